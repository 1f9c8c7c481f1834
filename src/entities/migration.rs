use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationType {
    Original,
    Thumbnail,
}

impl MigrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Original => "original",
            MigrationType::Thumbnail => "thumbnail",
        }
    }
}

impl Display for MigrationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "original" => Ok(MigrationType::Original),
            "thumbnail" => Ok(MigrationType::Thumbnail),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Paused => "paused",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(MigrationStatus::Pending),
            "running" => Ok(MigrationStatus::Running),
            "paused" => Ok(MigrationStatus::Paused),
            "completed" => Ok(MigrationStatus::Completed),
            "failed" => Ok(MigrationStatus::Failed),
            "cancelled" => Ok(MigrationStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// Candidate filter of a migration. Absent fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFilter {
    pub album_ids: Option<Vec<i64>>,
    pub taken_after: Option<DateTime<Utc>>,
    pub taken_before: Option<DateTime<Utc>>,
    pub min_bytes: Option<i64>,
    pub max_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTask {
    pub id: i64,
    pub migration_type: String,
    pub source_storage_id: String,
    pub target_storage_id: String,
    pub filter: serde_json::Value,
    pub delete_source_after: bool,
    pub status: String,
    pub total: i64,
    pub processed: i64,
    pub failed: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationTask {
    pub fn status(&self) -> Option<MigrationStatus> {
        self.status.parse().ok()
    }

    pub fn migration_type(&self) -> Option<MigrationType> {
        self.migration_type.parse().ok()
    }

    pub fn parsed_filter(&self) -> MigrationFilter {
        serde_json::from_value(self.filter.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationRecordStatus {
    Pending,
    Success,
    Failed,
}

impl MigrationRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationRecordStatus::Pending => "pending",
            MigrationRecordStatus::Success => "success",
            MigrationRecordStatus::Failed => "failed",
        }
    }
}

/// Per-file ledger entry; resume and audit both read this table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFileRecord {
    pub id: i64,
    pub task_id: i64,
    pub image_id: i64,
    pub status: String,
    pub error_msg: Option<String>,
}
