use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiTaskType {
    ImageEmbedding,
    TagEmbedding,
    AestheticScoring,
}

impl AiTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiTaskType::ImageEmbedding => "image-embedding",
            AiTaskType::TagEmbedding => "tag-embedding",
            AiTaskType::AestheticScoring => "aesthetic-scoring",
        }
    }

    /// Per-model task types get one queue per model; aesthetic scoring is a
    /// singleton queue.
    pub fn is_per_model(&self) -> bool {
        !matches!(self, AiTaskType::AestheticScoring)
    }

    /// Composite key identifying exactly one queue.
    pub fn queue_key(&self, model_name: Option<&str>) -> String {
        match model_name {
            Some(model) if self.is_per_model() => format!("{}|{}", self.as_str(), model),
            _ => self.as_str().to_string(),
        }
    }
}

impl Display for AiTaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AiTaskType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "image-embedding" => Ok(AiTaskType::ImageEmbedding),
            "tag-embedding" => Ok(AiTaskType::TagEmbedding),
            "aesthetic-scoring" => Ok(AiTaskType::AestheticScoring),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiQueueStatus {
    Idle,
    Processing,
}

impl AiQueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiQueueStatus::Idle => "idle",
            AiQueueStatus::Processing => "processing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AiQueue {
    pub id: i64,
    pub queue_key: String,
    pub task_type: String,
    pub model_name: Option<String>,
    pub pending_count: i64,
    pub failed_count: i64,
    pub status: String,
}

impl AiQueue {
    pub fn task_type(&self) -> Option<AiTaskType> {
        self.task_type.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiItemStatus {
    Pending,
    Failed,
}

impl AiItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiItemStatus::Pending => "pending",
            AiItemStatus::Failed => "failed",
        }
    }
}

/// Work item of a queue. Successful items are deleted, not updated; failed
/// items stay behind with the last error for the retry/ignore controls.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AiTaskItem {
    pub id: i64,
    pub queue_id: i64,
    pub item_id: i64,
    pub item_type: String,
    pub status: String,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}
