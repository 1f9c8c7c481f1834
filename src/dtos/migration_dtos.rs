use serde::{Deserialize, Serialize};

use crate::entities::{MigrationFilter, MigrationType};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMigrationRequest {
    #[serde(rename = "type")]
    pub migration_type: MigrationType,
    pub source_storage_id: String,
    pub target_storage_id: String,
    #[serde(default)]
    pub filter: MigrationFilter,
    #[serde(default)]
    pub delete_source_after: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPreviewDto {
    pub files_count: i64,
    pub total_bytes: i64,
    pub estimated_seconds: i64,
}

/// Telemetry frame published over the hub while a task runs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgressDto {
    pub task_id: i64,
    pub status: String,
    pub processed: i64,
    pub failed: i64,
    pub total: i64,
    pub percent: f64,
    pub bytes_per_sec: f64,
    pub remaining_seconds: i64,
}
