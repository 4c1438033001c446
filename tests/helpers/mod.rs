//! Test doubles for the store and broker seams.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use thumbnail_worker::db::store::JobStore;
use thumbnail_worker::db::StoreError;
use thumbnail_worker::models::job::{ImageId, JobRecord, JobStatus};
use thumbnail_worker::models::task::CompletionEvent;
use thumbnail_worker::services::queue::{CompletionPublisher, Delivery, QueueError, TaskQueue};

/// Job store held in memory. Updates against unknown ids fail like a
/// zero-row `UPDATE` does in PostgreSQL.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: Mutex<HashMap<ImageId, JobRecord>>,
    writes: Mutex<Vec<(ImageId, JobStatus)>>,
    failing: Mutex<HashSet<JobStatus>>,
    unhealthy: AtomicBool,
}

impl InMemoryJobStore {
    pub fn with_pending(ids: &[i32]) -> Self {
        let store = Self::default();
        for id in ids {
            store.insert(JobRecord::pending(ImageId(*id)));
        }
        store
    }

    pub fn insert(&self, record: JobRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    pub fn record(&self, id: i32) -> JobRecord {
        self.records
            .lock()
            .unwrap()
            .get(&ImageId(id))
            .cloned()
            .expect("record exists")
    }

    /// Every successful transition, in order.
    pub fn writes(&self) -> Vec<(ImageId, JobStatus)> {
        self.writes.lock().unwrap().clone()
    }

    /// Make every write into `status` fail.
    pub fn fail_on(&self, status: JobStatus) {
        self.failing.lock().unwrap().insert(status);
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    fn apply<F>(&self, image_id: ImageId, status: JobStatus, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        if self.failing.lock().unwrap().contains(&status) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&image_id)
            .ok_or(StoreError::NotFound(image_id))?;
        record.status = status;
        update(record);
        self.writes.lock().unwrap().push((image_id, status));
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn mark_processing(
        &self,
        image_id: ImageId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.apply(image_id, JobStatus::Processing, |r| {
            r.processing_started_at = Some(started_at);
        })
    }

    async fn mark_completed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        thumbnail_filename: &str,
        thumbnail_size: u64,
    ) -> Result<(), StoreError> {
        self.apply(image_id, JobStatus::Completed, |r| {
            r.completed_at = Some(completed_at);
            r.thumbnail_filename = Some(thumbnail_filename.to_string());
            r.thumbnail_size = Some(thumbnail_size as i64);
            r.error_message = None;
        })
    }

    async fn mark_failed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), StoreError> {
        self.apply(image_id, JobStatus::Failed, |r| {
            r.completed_at = Some(completed_at);
            r.error_message = Some(error_message.to_string());
            r.thumbnail_filename = None;
            r.thumbnail_size = None;
        })
    }

    async fn get_record(&self, image_id: ImageId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(&image_id).cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

/// Publisher that records events, or rejects them all when `failing`.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<CompletionEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionPublisher for RecordingPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Disconnected);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub enum Step {
    Deliver(Delivery),
    /// Signals `received` as soon as the receive starts, then hands out the
    /// delivery after the delay.
    DeliverAfter(Duration, Delivery),
    Idle,
    TransientError,
}

/// Queue that replays a fixed script. Once drained it either reports the
/// consumer as closed or waits forever, depending on `hang_when_drained`.
pub struct ScriptedQueue {
    steps: Mutex<VecDeque<Step>>,
    acked: Mutex<Vec<u64>>,
    hang_when_drained: bool,
    cancel_safe: bool,
    pub received: Arc<Notify>,
    unhealthy: AtomicBool,
}

impl ScriptedQueue {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            acked: Mutex::new(Vec::new()),
            hang_when_drained: false,
            cancel_safe: true,
            received: Arc::new(Notify::new()),
            unhealthy: AtomicBool::new(false),
        }
    }

    pub fn hanging(steps: Vec<Step>) -> Self {
        Self {
            hang_when_drained: true,
            ..Self::new(steps)
        }
    }

    /// Behave like a backend that moves the task before replying.
    pub fn not_cancel_safe(mut self) -> Self {
        self.cancel_safe = false;
        self
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for ScriptedQueue {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Deliver(delivery)) => {
                self.received.notify_one();
                Ok(Some(delivery))
            }
            Some(Step::DeliverAfter(delay, delivery)) => {
                self.received.notify_one();
                tokio::time::sleep(delay).await;
                Ok(Some(delivery))
            }
            Some(Step::Idle) => Ok(None),
            Some(Step::TransientError) => Err(QueueError::Disconnected),
            None if self.hang_when_drained => std::future::pending().await,
            None => Err(QueueError::ConsumerClosed("thumbnail_processing".into())),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.acked.lock().unwrap().push(delivery.delivery_tag);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(QueueError::Disconnected);
        }
        Ok(())
    }

    fn cancel_safe(&self) -> bool {
        self.cancel_safe
    }
}

pub fn delivery(tag: u64, payload: impl Into<Vec<u8>>) -> Delivery {
    Delivery {
        delivery_tag: tag,
        redelivered: false,
        payload: payload.into(),
    }
}
