use axum::Json;
use axum::extract::{Path, State};
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::share_dtos::{
    CreateShareRequest, ShareAccessRequest, ShareImagesResponse, ShareInfoDto,
};
use crate::entities::Share;
use crate::errors::AppResult;

fn to_info(share: &Share, image_count: i64) -> ShareInfoDto {
    ShareInfoDto {
        code: share.code.clone(),
        has_password: share.has_password(),
        expire_at: share.expire_at,
        is_active: share.is_active,
        image_count,
        view_count: share.view_count,
        created_at: share.created_at,
    }
}

pub async fn create(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CreateShareRequest>,
) -> AppResult<Json<ApiResponse<ShareInfoDto>>> {
    let share = context
        .shares
        .create(
            &request.image_ids,
            request.password.as_deref(),
            request.expire_at,
        )
        .await?;
    let count = request.image_ids.len() as i64;
    Ok(ok(to_info(&share, count)))
}

pub async fn list(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<ShareInfoDto>>>> {
    let shares = context.shares.list().await?;
    Ok(ok(shares
        .iter()
        .map(|(share, count)| to_info(share, *count))
        .collect()))
}

pub async fn deactivate(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    context.shares.deactivate(id).await?;
    Ok(ok(true))
}

/// Public share metadata; no password needed to see that one is required.
pub async fn info(
    State(context): State<Arc<AppContext>>,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<ShareInfoDto>>> {
    let (share, count) = context.shares.info(&code).await?;
    Ok(ok(to_info(&share, count)))
}

/// Public image listing; password travels in the body, never the URL.
pub async fn images(
    State(context): State<Arc<AppContext>>,
    Path(code): Path<String>,
    Json(request): Json<ShareAccessRequest>,
) -> AppResult<Json<ApiResponse<ShareImagesResponse>>> {
    let rows = context
        .shares
        .access(&code, request.password.as_deref())
        .await?;
    let mut images = Vec::with_capacity(rows.len());
    for image in rows {
        images.push(context.ingest.to_dto(image).await);
    }
    Ok(ok(ShareImagesResponse { images }))
}
