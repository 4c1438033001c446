use async_trait::async_trait;

use crate::models::task::CompletionEvent;

/// One message taken off the processing queue, not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    /// The broker has handed this message out before (at-least-once redelivery).
    pub redelivered: bool,
    pub payload: Vec<u8>,
}

/// Inbound side of the broker: where thumbnail tasks come from.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Wait for the next delivery. `Ok(None)` means the backend's wait window
    /// elapsed with nothing to hand out; callers should simply ask again.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Settle a delivery so the broker will not hand it out again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Check broker connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError>;

    /// Whether a pending `receive` can be dropped without losing a task.
    /// Backends that move the task server-side before replying return
    /// `false`, and the consumer loop then lets every receive finish.
    fn cancel_safe(&self) -> bool {
        true
    }
}

/// Outbound side of the broker: notifies downstream consumers of finished thumbnails.
#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker did not confirm publish to {0}")]
    NotConfirmed(String),

    #[error("Consumer for queue {0} was closed by the broker")]
    ConsumerClosed(String),

    #[error("Broker connection is not open")]
    Disconnected,
}

impl QueueError {
    /// The consumer can never produce another delivery after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::ConsumerClosed(_))
    }
}
