use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::StoreError;
use crate::models::job::{ImageId, JobRecord, JobStatus};

/// Move a record into `processing`.
pub async fn mark_processing(
    pool: &PgPool,
    image_id: ImageId,
    started_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE images
        SET status = $1,
            processing_started_at = $2
        WHERE id = $3
        "#,
    )
    .bind(JobStatus::Processing.to_string())
    .bind(started_at)
    .bind(image_id.0)
    .execute(pool)
    .await?;

    ensure_updated(result.rows_affected(), image_id)
}

/// Move a record into `completed` and record the thumbnail it produced.
/// Clears any error left by an earlier failed delivery.
pub async fn mark_completed(
    pool: &PgPool,
    image_id: ImageId,
    completed_at: DateTime<Utc>,
    thumbnail_filename: &str,
    thumbnail_size: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE images
        SET status = $1,
            completed_at = $2,
            thumbnail_filename = $3,
            thumbnail_size = $4,
            error_message = NULL
        WHERE id = $5
        "#,
    )
    .bind(JobStatus::Completed.to_string())
    .bind(completed_at)
    .bind(thumbnail_filename)
    .bind(thumbnail_size)
    .bind(image_id.0)
    .execute(pool)
    .await?;

    ensure_updated(result.rows_affected(), image_id)
}

/// Move a record into `failed` with the error that ended it. Clears any
/// thumbnail left by an earlier completed delivery.
pub async fn mark_failed(
    pool: &PgPool,
    image_id: ImageId,
    completed_at: DateTime<Utc>,
    error_message: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE images
        SET status = $1,
            error_message = $2,
            completed_at = $3,
            thumbnail_filename = NULL,
            thumbnail_size = NULL
        WHERE id = $4
        "#,
    )
    .bind(JobStatus::Failed.to_string())
    .bind(error_message)
    .bind(completed_at)
    .bind(image_id.0)
    .execute(pool)
    .await?;

    ensure_updated(result.rows_affected(), image_id)
}

/// Get a job record by ID
pub async fn get_record(pool: &PgPool, image_id: ImageId) -> Result<Option<JobRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, status, processing_started_at, completed_at,
               thumbnail_filename, thumbnail_size, error_message
        FROM images
        WHERE id = $1
        "#,
    )
    .bind(image_id.0)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };

    let status_str: String = r.try_get("status")?;
    let status =
        JobStatus::from_str(&status_str).map_err(|_| StoreError::InvalidStatus(status_str))?;

    Ok(Some(JobRecord {
        id: ImageId(r.try_get("id")?),
        status,
        processing_started_at: r.try_get("processing_started_at")?,
        completed_at: r.try_get("completed_at")?,
        thumbnail_filename: r.try_get("thumbnail_filename")?,
        thumbnail_size: r.try_get("thumbnail_size")?,
        error_message: r.try_get("error_message")?,
    }))
}

/// Insert a pending record the way the upload service does. Used to seed
/// development databases and integration tests.
pub async fn insert_pending(
    pool: &PgPool,
    original_filename: &str,
    stored_filename: &str,
    file_size: i32,
    mime_type: &str,
) -> Result<ImageId, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO images (original_filename, stored_filename, file_size, mime_type, status)
        VALUES ($1, $2, $3, $4, 'pending')
        RETURNING id
        "#,
    )
    .bind(original_filename)
    .bind(stored_filename)
    .bind(file_size)
    .bind(mime_type)
    .fetch_one(pool)
    .await?;

    Ok(ImageId(row.try_get("id")?))
}

fn ensure_updated(rows_affected: u64, image_id: ImageId) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(image_id));
    }
    Ok(())
}
