pub mod amqp;
pub mod queue;
pub mod redis_queue;
pub mod thumbnail;
