use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::queue::{CompletionPublisher, Delivery, QueueError, TaskQueue};
use crate::models::task::CompletionEvent;

/// Redis list consumer using the reliable-queue pattern: a receive moves the
/// payload onto `<queue>:processing`, and the acknowledgment removes it.
pub struct RedisTaskQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
    block_timeout: Duration,
    next_tag: AtomicU64,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str, queue: &str, block_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: queue.to_string(),
            processing_key: format!("{queue}:processing"),
            block_timeout,
            next_tag: AtomicU64::new(1),
        })
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// Push a raw payload onto the queue (producer side; used for seeding and tests).
    pub async fn push_raw(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.lpush::<_, _, ()>(&self.queue_key, payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending tasks).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let result: Option<Vec<u8>> = conn
            .brpoplpush(
                &self.queue_key,
                &self.processing_key,
                self.block_timeout.as_secs_f64(),
            )
            .await
            .map_err(QueueError::Redis)?;

        Ok(result.map(|payload| Delivery {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
            redelivered: false,
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, delivery.payload.as_slice())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    // BRPOPLPUSH has already moved the task onto the processing list by the
    // time the reply arrives, so a dropped receive would strand it there.
    fn cancel_safe(&self) -> bool {
        false
    }
}

/// Pushes completion events onto a Redis list.
pub struct RedisPublisher {
    client: redis::Client,
    queue_key: String,
}

impl RedisPublisher {
    pub fn new(redis_url: &str, queue: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: queue.to_string(),
        })
    }
}

#[async_trait]
impl CompletionPublisher for RedisPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(event).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;

        tracing::info!(
            image_id = %event.image_id,
            queue = %self.queue_key,
            "Sent completion notification"
        );
        Ok(())
    }
}
