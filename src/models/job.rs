use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Primary key of a job record in the `images` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageId(pub i32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i32> for ImageId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Producers send the id either as a JSON number or as a numeric string.
impl<'de> Deserialize<'de> for ImageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        let value = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| serde::de::Error::custom(format!("imageId is not numeric: {s:?}")))?,
        };

        i32::try_from(value)
            .map(ImageId)
            .map_err(|_| serde::de::Error::custom(format!("imageId out of range: {value}")))
    }
}

/// Lifecycle status of a thumbnail job record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` end a delivery; nothing moves a record out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// The persisted row tracking one image's thumbnailing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: ImageId,
    pub status: JobStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub thumbnail_filename: Option<String>,
    pub thumbnail_size: Option<i64>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// A freshly produced record, as the upstream producer inserts it.
    pub fn pending(id: ImageId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            processing_started_at: None,
            completed_at: None,
            thumbnail_filename: None,
            thumbnail_size: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let text = status.to_string();
            assert_eq!(JobStatus::from_str(&text).unwrap(), status);
        }
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert!(JobStatus::from_str("archived").is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn image_id_accepts_number_or_numeric_string() {
        let from_number: ImageId = serde_json::from_str("42").unwrap();
        let from_text: ImageId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, ImageId(42));
        assert_eq!(from_text, ImageId(42));

        assert!(serde_json::from_str::<ImageId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<ImageId>("9999999999").is_err());
        assert!(serde_json::from_str::<ImageId>("null").is_err());
    }
}
