use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::job::ImageId;

pub mod queries;
pub mod store;

/// Initialize PostgreSQL connection pool.
///
/// Each status transition checks out a connection for a single statement, so
/// a small pool is enough for one in-flight task per worker.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No job record with id {0}")]
    NotFound(ImageId),

    #[error("Unrecognized job status {0:?}")]
    InvalidStatus(String),
}
