use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::entities::{Tag, TagWithCount};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPayload {
    pub name: String,
    pub color: Option<String>,
}

pub async fn list(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<TagWithCount>>>> {
    Ok(ok(context.tags.list_with_counts().await?))
}

pub async fn create(
    State(context): State<Arc<AppContext>>,
    Json(payload): Json<TagPayload>,
) -> AppResult<Json<ApiResponse<Tag>>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("tag name must not be empty"));
    }
    let tag = context
        .tags
        .get_or_create(name, payload.color.as_deref())
        .await?;
    if let Err(error) = context.ai.enqueue_tag(tag.id).await {
        log::error!("enqueueing tag embedding for {} failed: {error:#}", tag.id);
    }
    Ok(ok(tag))
}

/// Renames re-enqueue the tag so its embeddings follow the new name.
pub async fn update(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(payload): Json<TagPayload>,
) -> AppResult<Json<ApiResponse<Tag>>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("tag name must not be empty"));
    }
    let tag = context
        .tags
        .rename(id, name, payload.color.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found("tag not found"))?;
    if let Err(error) = context.ai.enqueue_tag(tag.id).await {
        log::error!("enqueueing tag embedding for {} failed: {error:#}", tag.id);
    }
    Ok(ok(tag))
}

pub async fn delete(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    if !context.tags.delete(id).await? {
        return Err(AppError::not_found("tag not found"));
    }
    Ok(ok(true))
}
