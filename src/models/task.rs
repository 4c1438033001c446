use garde::Validate;
use serde::{Deserialize, Serialize};

use super::job::ImageId;

/// Thumbnail task payload as published onto the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailTask {
    #[garde(skip)]
    pub image_id: ImageId,

    #[garde(length(min = 1))]
    pub original_path: String,

    #[garde(length(min = 1))]
    pub original_filename: String,

    #[garde(length(min = 1))]
    pub thumbnail_path: String,

    #[garde(length(min = 1))]
    pub thumbnail_filename: String,
}

impl ThumbnailTask {
    /// Decode and validate a raw delivery body.
    pub fn from_payload(payload: &[u8]) -> Result<Self, TaskError> {
        let task: ThumbnailTask = serde_json::from_slice(payload)?;
        task.validate()?;
        Ok(task)
    }

    pub fn completion_event(&self) -> CompletionEvent {
        CompletionEvent {
            image_id: self.image_id,
            thumbnail_filename: self.thumbnail_filename.clone(),
        }
    }
}

/// Event published to the completed queue once a record reaches `completed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub image_id: ImageId,
    pub thumbnail_filename: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Malformed task payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid task payload: {0}")]
    Invalid(#[from] garde::Report),
}
