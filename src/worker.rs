//! Job lifecycle state machine and the consumer loop that drives it.
//!
//! A delivery moves `processing -> completed` or `processing -> failed`.
//! Every delivery is acknowledged after processing, whatever the outcome, so a
//! task whose status write failed is not redelivered forever. Redelivery by
//! the broker (at-least-once) simply re-runs the pipeline for that image.

use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::store::JobStore;
use crate::db::StoreError;
use crate::models::job::ImageId;
use crate::models::task::ThumbnailTask;
use crate::services::queue::{CompletionPublisher, Delivery, QueueError, TaskQueue};
use crate::services::thumbnail;

/// Bounding box every thumbnail must fit inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeBounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeBounds {
    fn default() -> Self {
        Self {
            max_width: 128,
            max_height: 128,
        }
    }
}

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        image_id: ImageId,
        thumbnail_size: u64,
        /// Whether the completion event reached the broker.
        notified: bool,
    },
    Failed {
        image_id: ImageId,
        error: String,
    },
    /// Payload could not be decoded; the store was not touched.
    Malformed {
        error: String,
    },
}

/// Runs one task through the state machine.
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn CompletionPublisher>,
    bounds: ResizeBounds,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn CompletionPublisher>,
        bounds: ResizeBounds,
    ) -> Self {
        Self {
            store,
            publisher,
            bounds,
        }
    }

    /// Decode a raw delivery body and process it.
    pub async fn process_payload(&self, payload: &[u8]) -> JobOutcome {
        match ThumbnailTask::from_payload(payload) {
            Ok(task) => self.process(&task).await,
            Err(e) => {
                metrics::counter!("thumbnail_jobs_malformed_total").increment(1);
                tracing::warn!(
                    error = %e,
                    payload_len = payload.len(),
                    "Dropping malformed thumbnail task"
                );
                JobOutcome::Malformed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Drive a decoded task to a terminal status.
    pub async fn process(&self, task: &ThumbnailTask) -> JobOutcome {
        let image_id = task.image_id;
        let start = Instant::now();

        tracing::info!(
            image_id = %image_id,
            original_path = %task.original_path,
            "Processing thumbnail task"
        );

        // A failed write here does not stop the resize attempt.
        if let Err(e) = self.store.mark_processing(image_id, Utc::now()).await {
            log_store_error(image_id, "processing", &e);
        }

        let result = thumbnail::resize_blocking(
            PathBuf::from(&task.original_path),
            PathBuf::from(&task.thumbnail_path),
            self.bounds.max_width,
            self.bounds.max_height,
        )
        .await;

        let outcome = match result {
            Ok(thumbnail_size) => {
                if let Err(e) = self
                    .store
                    .mark_completed(
                        image_id,
                        Utc::now(),
                        &task.thumbnail_filename,
                        thumbnail_size,
                    )
                    .await
                {
                    log_store_error(image_id, "completed", &e);
                }

                let notified = match self.publisher.publish(&task.completion_event()).await {
                    Ok(()) => true,
                    Err(e) => {
                        metrics::counter!("thumbnail_publish_errors_total").increment(1);
                        tracing::error!(
                            image_id = %image_id,
                            error = %e,
                            "Failed to send completion notification"
                        );
                        false
                    }
                };

                metrics::counter!("thumbnail_jobs_completed_total").increment(1);
                tracing::info!(
                    image_id = %image_id,
                    thumbnail_path = %task.thumbnail_path,
                    thumbnail_size,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Thumbnail created"
                );

                JobOutcome::Completed {
                    image_id,
                    thumbnail_size,
                    notified,
                }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::error!(image_id = %image_id, error = %error, "Thumbnail generation failed");

                if let Err(e) = self.store.mark_failed(image_id, Utc::now(), &error).await {
                    log_store_error(image_id, "failed", &e);
                }

                metrics::counter!("thumbnail_jobs_failed_total").increment(1);
                JobOutcome::Failed { image_id, error }
            }
        };

        metrics::histogram!("thumbnail_processing_seconds").record(start.elapsed().as_secs_f64());
        outcome
    }
}

fn log_store_error(image_id: ImageId, transition: &'static str, error: &StoreError) {
    metrics::counter!("thumbnail_store_errors_total", "transition" => transition).increment(1);
    tracing::error!(
        image_id = %image_id,
        transition,
        error = %error,
        "Failed to update job record; status may be stale"
    );
}

/// Process one delivery and acknowledge it regardless of outcome.
pub async fn handle_delivery(
    queue: &dyn TaskQueue,
    processor: &JobProcessor,
    delivery: Delivery,
) -> JobOutcome {
    metrics::counter!("thumbnail_jobs_received_total").increment(1);
    if delivery.redelivered {
        tracing::info!(
            delivery_tag = delivery.delivery_tag,
            "Task was redelivered; reprocessing"
        );
    }

    let outcome = processor.process_payload(&delivery.payload).await;

    if let Err(e) = queue.ack(&delivery).await {
        tracing::error!(
            delivery_tag = delivery.delivery_tag,
            error = %e,
            "Failed to acknowledge delivery; broker may redeliver it"
        );
    }

    outcome
}

/// Consume until `shutdown` resolves or the consumer is closed.
///
/// A delivery that has been received when the signal arrives is processed and
/// acknowledged before the loop returns. For queues that are not
/// [`TaskQueue::cancel_safe`], an outstanding receive is never abandoned, so
/// shutdown may wait up to one receive window.
pub async fn run<S>(
    queue: Arc<dyn TaskQueue>,
    processor: &JobProcessor,
    shutdown: S,
    retry_backoff: Duration,
) -> Result<(), QueueError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let received = if queue.cancel_safe() {
            tokio::select! {
                biased;
                _ = &mut shutdown => None,
                received = queue.receive() => Some(received),
            }
        } else if (&mut shutdown).now_or_never().is_some() {
            None
        } else {
            // Shutdown is observed once this receive's wait window ends.
            Some(queue.receive().await)
        };

        let Some(received) = received else {
            tracing::info!("Shutdown requested, worker stopping");
            return Ok(());
        };

        match received {
            Ok(Some(delivery)) => {
                handle_delivery(queue.as_ref(), processor, delivery).await;
            }
            Ok(None) => {
                tracing::trace!("No tasks available");
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Task consumer closed");
                return Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "Error receiving task, will retry");
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        tracing::info!("Shutdown requested, worker stopping");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(retry_backoff) => {}
                }
            }
        }
    }
}
