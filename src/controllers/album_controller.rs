use axum::Json;
use axum::extract::{Path, State};
use serde_json::json;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::album_dtos::{
    AlbumImagesRequest, CreateAlbumRequest, SmartAlbumGenerateRequest, UpdateAlbumRequest,
};
use crate::dtos::image_dtos::ImageDto;
use crate::entities::{Album, AlbumWithCount};
use crate::errors::{AppError, AppResult};
use crate::ws::message_types;

/// Album change fanout is advisory; hub errors never fail the mutation.
fn notify_albums_changed(context: &Arc<AppContext>, data: serde_json::Value) {
    if let Err(error) = context.hub.broadcast(message_types::ALBUMS_CHANGED, data) {
        log::warn!("albums-changed broadcast failed: {error:#}");
    }
}

pub async fn list(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<AlbumWithCount>>>> {
    Ok(ok(context.albums.list_with_counts().await?))
}

pub async fn get_one(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Album>>> {
    let album = context
        .albums
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("album not found"))?;
    Ok(ok(album))
}

pub async fn images(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Vec<ImageDto>>>> {
    let rows = context.albums.images_of(id).await?;
    let mut items = Vec::with_capacity(rows.len());
    for image in rows {
        items.push(context.ingest.to_dto(image).await);
    }
    Ok(ok(items))
}

pub async fn create(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CreateAlbumRequest>,
) -> AppResult<Json<ApiResponse<Album>>> {
    if request.name.trim().is_empty() {
        return Err(AppError::bad_request("album name must not be empty"));
    }
    let album = context
        .albums
        .create(request.name.trim(), request.description.as_deref())
        .await?;
    if !request.image_ids.is_empty() {
        context
            .albums
            .add_images(album.id, &request.image_ids)
            .await?;
    }
    notify_albums_changed(&context, json!({ "created": [album.id] }));
    Ok(ok(album))
}

pub async fn update(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateAlbumRequest>,
) -> AppResult<Json<ApiResponse<Album>>> {
    let album = context
        .albums
        .update(
            id,
            request.name.as_deref(),
            request.description.as_deref(),
            request.cover_image_id,
        )
        .await?
        .ok_or_else(|| AppError::not_found("album not found"))?;
    notify_albums_changed(&context, json!({ "updated": [id] }));
    Ok(ok(album))
}

pub async fn delete(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    if !context.albums.delete(id).await? {
        return Err(AppError::not_found("album not found"));
    }
    notify_albums_changed(&context, json!({ "deleted": [id] }));
    Ok(ok(true))
}

pub async fn add_images(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(request): Json<AlbumImagesRequest>,
) -> AppResult<Json<ApiResponse<u64>>> {
    let added = context.albums.add_images(id, &request.image_ids).await?;
    Ok(ok(added))
}

pub async fn remove_images(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(request): Json<AlbumImagesRequest>,
) -> AppResult<Json<ApiResponse<u64>>> {
    let removed = context
        .albums
        .remove_images(id, &request.image_ids)
        .await?;
    Ok(ok(removed))
}

/// Synchronous legacy generation: blocks until the clustering run finishes
/// and returns the created albums.
pub async fn smart_generate(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<SmartAlbumGenerateRequest>,
) -> AppResult<Json<ApiResponse<Vec<Album>>>> {
    Ok(ok(context.smart_albums.generate_sync(request).await?))
}
