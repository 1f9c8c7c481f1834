use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::migration_dtos::{CreateMigrationRequest, MigrationPreviewDto};
use crate::entities::{MigrationFileRecord, MigrationTask};
use crate::errors::AppResult;
use crate::storage::StorageStats;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStats {
    pub image_count: i64,
    pub total_bytes: i64,
    pub storage: Vec<StorageStats>,
}

/// Aggregate numbers for the dashboard and the WebSocket setup burst.
pub async fn stats(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<LibraryStats>>> {
    Ok(ok(LibraryStats {
        image_count: context.images.count_live().await?,
        total_bytes: context.images.total_bytes().await?,
        storage: context.storage.multi_stats().await?,
    }))
}

pub async fn create_migration(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CreateMigrationRequest>,
) -> AppResult<Json<ApiResponse<MigrationTask>>> {
    Ok(ok(context.migrations.start(request).await?))
}

pub async fn preview_migration(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CreateMigrationRequest>,
) -> AppResult<Json<ApiResponse<MigrationPreviewDto>>> {
    Ok(ok(context.migrations.preview(&request).await?))
}

pub async fn pause(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<MigrationTask>>> {
    context.migrations.pause(id).await?;
    Ok(ok(context.migrations.get(id).await?))
}

pub async fn resume(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<MigrationTask>>> {
    context.migrations.resume(id).await?;
    Ok(ok(context.migrations.get(id).await?))
}

pub async fn cancel(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<MigrationTask>>> {
    context.migrations.cancel(id).await?;
    Ok(ok(context.migrations.get(id).await?))
}

pub async fn retry(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context.migrations.retry(id).await?))
}

pub async fn dismiss(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<MigrationTask>>> {
    context.migrations.dismiss(id).await?;
    Ok(ok(context.migrations.get(id).await?))
}

pub async fn list_active(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<MigrationTask>>>> {
    Ok(ok(context.migrations.list_active().await?))
}

pub async fn failed_records(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Vec<MigrationFileRecord>>>> {
    Ok(ok(context.migrations.failed_records(id).await?))
}
