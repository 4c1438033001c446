use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{queries, StoreError};
use crate::models::job::{ImageId, JobRecord};

/// Status transitions for job records.
///
/// Every method is a single atomic update against one record. Implementations
/// must not hold a connection between calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn mark_processing(
        &self,
        image_id: ImageId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_completed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        thumbnail_filename: &str,
        thumbnail_size: u64,
    ) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), StoreError>;

    async fn get_record(&self, image_id: ImageId) -> Result<Option<JobRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn mark_processing(
        &self,
        image_id: ImageId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        queries::mark_processing(&self.pool, image_id, started_at).await
    }

    async fn mark_completed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        thumbnail_filename: &str,
        thumbnail_size: u64,
    ) -> Result<(), StoreError> {
        // Thumbnails are bounded to a few hundred pixels; saturate rather than wrap.
        let size = i64::try_from(thumbnail_size).unwrap_or(i64::MAX);
        queries::mark_completed(&self.pool, image_id, completed_at, thumbnail_filename, size).await
    }

    async fn mark_failed(
        &self,
        image_id: ImageId,
        completed_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), StoreError> {
        queries::mark_failed(&self.pool, image_id, completed_at, error_message).await
    }

    async fn get_record(&self, image_id: ImageId) -> Result<Option<JobRecord>, StoreError> {
        queries::get_record(&self.pool, image_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
