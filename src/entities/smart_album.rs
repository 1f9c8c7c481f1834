use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmartAlbumTaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SmartAlbumTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmartAlbumTaskStatus::Running => "running",
            SmartAlbumTaskStatus::Completed => "completed",
            SmartAlbumTaskStatus::Failed => "failed",
            SmartAlbumTaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Record of one asynchronous clustering run. Noise image ids are kept here
/// so clients can inspect what the algorithm left unassigned.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SmartAlbumTask {
    pub id: Uuid,
    pub model_name: String,
    pub params: JsonValue,
    pub status: String,
    pub error: Option<String>,
    pub album_ids: Vec<i64>,
    pub noise_image_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
