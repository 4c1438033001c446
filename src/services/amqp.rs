//! RabbitMQ transport for tasks and completion events, built on `lapin`.
//!
//! The consume side holds one long-lived channel with a prefetch of 1, so the
//! broker never hands this worker more than the delivery it is processing.
//! Each completion event is published on a short-lived channel of its own.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::queue::{CompletionPublisher, Delivery, QueueError, TaskQueue};
use crate::models::task::CompletionEvent;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Open a broker connection shared by the consumer and the publisher.
pub async fn connect(url: &str) -> Result<Arc<Connection>, QueueError> {
    let connection = Connection::connect(
        url,
        ConnectionProperties::default().with_connection_name("thumbnail-worker".into()),
    )
    .await
    .map_err(QueueError::Amqp)?;
    Ok(Arc::new(connection))
}

/// Declare a durable queue. Safe to repeat; the broker treats it as create-if-absent.
pub async fn declare_durable(channel: &Channel, queue: &str) -> Result<(), QueueError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(QueueError::Amqp)?;
    Ok(())
}

/// Declare each queue on a throwaway channel.
pub async fn declare_queues(connection: &Connection, queues: &[&str]) -> Result<(), QueueError> {
    let channel = connection.create_channel().await.map_err(QueueError::Amqp)?;
    for queue in queues {
        declare_durable(&channel, queue).await?;
    }
    channel.close(200, "OK").await.map_err(QueueError::Amqp)?;
    Ok(())
}

/// Consumer on the processing queue.
pub struct AmqpTaskQueue {
    connection: Arc<Connection>,
    channel: Channel,
    consumer: Mutex<Consumer>,
    queue: String,
}

impl AmqpTaskQueue {
    pub async fn new(connection: Arc<Connection>, queue: &str) -> Result<Self, QueueError> {
        let channel = connection.create_channel().await.map_err(QueueError::Amqp)?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(QueueError::Amqp)?;

        declare_durable(&channel, queue).await?;

        let consumer = channel
            .basic_consume(
                queue,
                "thumbnail-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::Amqp)?;

        tracing::info!(queue = %queue, "Consuming from AMQP queue");

        Ok(Self {
            connection,
            channel,
            consumer: Mutex::new(consumer),
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl TaskQueue for AmqpTaskQueue {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut consumer = self.consumer.lock().await;
        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })),
            Some(Err(e)) => Err(QueueError::Amqp(e)),
            None => Err(QueueError::ConsumerClosed(self.queue.clone())),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(QueueError::Amqp)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.connection.status().connected() && self.channel.status().connected() {
            Ok(())
        } else {
            Err(QueueError::Disconnected)
        }
    }
}

/// Publishes completion events, one short-lived channel per event.
pub struct AmqpPublisher {
    connection: Arc<Connection>,
    queue: String,
}

impl AmqpPublisher {
    pub fn new(connection: Arc<Connection>, queue: &str) -> Self {
        Self {
            connection,
            queue: queue.to_string(),
        }
    }

    async fn publish_on(&self, channel: &Channel, payload: &[u8]) -> Result<(), QueueError> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(QueueError::Amqp)?;

        declare_durable(channel, &self.queue).await?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(QueueError::Amqp)?
            .await
            .map_err(QueueError::Amqp)?;

        if confirmation.is_nack() {
            return Err(QueueError::NotConfirmed(self.queue.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionPublisher for AmqpPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event).map_err(QueueError::Serialize)?;
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(QueueError::Amqp)?;

        let result = self.publish_on(&channel, &payload).await;

        if let Err(e) = channel.close(200, "OK").await {
            tracing::warn!(queue = %self.queue, error = %e, "Failed to close publish channel");
        }

        if result.is_ok() {
            tracing::info!(
                image_id = %event.image_id,
                queue = %self.queue,
                "Sent completion notification"
            );
        }
        result
    }
}
