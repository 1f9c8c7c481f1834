use axum::Json;
use axum::extract::{Path, State};
use std::sync::Arc;
use uuid::Uuid;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::ai_dtos::TestConnectionRequest;
use crate::dtos::album_dtos::{SmartAlbumGenerateRequest, SmartAlbumGenerateResponse};
use crate::entities::{AiQueue, AiTaskItem};
use crate::errors::{AppError, AppResult};

pub async fn list_queues(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<AiQueue>>>> {
    Ok(ok(context
        .ai
        .queue_snapshot()
        .await
        .map_err(AppError::Internal)?))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDetail {
    #[serde(flatten)]
    pub queue: AiQueue,
    pub failed_items: Vec<AiTaskItem>,
}

pub async fn get_queue(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<QueueDetail>>> {
    let queues = context
        .ai
        .queue_snapshot()
        .await
        .map_err(AppError::Internal)?;
    let queue = queues
        .into_iter()
        .find(|queue| queue.id == id)
        .ok_or_else(|| AppError::not_found("queue not found"))?;
    let failed_items = context.queues.failed_items(id).await?;
    Ok(ok(QueueDetail {
        queue,
        failed_items,
    }))
}

pub async fn retry_queue(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context.ai.retry_queue(id).await?))
}

pub async fn clear_queue(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context.ai.clear_queue_failures(id).await?))
}

pub async fn retry_item(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    context.ai.retry_item(id).await?;
    Ok(ok(true))
}

pub async fn ignore_item(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    context.ai.ignore_item(id).await?;
    Ok(ok(true))
}

pub async fn test_connection(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<TestConnectionRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    context.ai.test_connection(&request.provider).await?;
    Ok(ok(true))
}

/// Asynchronous smart-album generation; progress streams over the hub as
/// `smart_album_progress` frames carrying the returned task id.
pub async fn smart_albums_generate(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<SmartAlbumGenerateRequest>,
) -> AppResult<Json<ApiResponse<SmartAlbumGenerateResponse>>> {
    let task_id = context.smart_albums.generate(request).await?;
    Ok(ok(SmartAlbumGenerateResponse { task_id }))
}

pub async fn smart_albums_cancel(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<bool>>> {
    context.smart_albums.cancel(id)?;
    Ok(ok(true))
}
