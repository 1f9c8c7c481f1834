use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::image_dtos::{
    BatchIdsRequest, ClustersQuery, ConfirmUploadRequest, ConfirmUploadResponse, GeoBoundsDto,
    ImageDto, ListImagesQuery, MapClusterDto, PagedImages, PrepareUploadRequest,
    PrepareUploadResponse, UpdateImageRequest,
};
use crate::errors::{AppError, AppResult};
use crate::repositories::ImageSort;
use crate::services::BoundingBox;
use crate::services::upload_token::UploadSlot;
use crate::storage::ByteStream;

pub async fn list(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<ListImagesQuery>,
) -> AppResult<Json<ApiResponse<PagedImages>>> {
    let page = query.page.unwrap_or(1).max(1);
    let default_page_size = context
        .settings
        .snapshot()
        .map_err(AppError::Internal)?
        .general
        .default_page_size;
    let page_size = query.page_size.unwrap_or(default_page_size).clamp(1, 200);
    let sort = ImageSort::parse(query.sort_by.as_deref());

    let rows = context.images.list(page, page_size, sort).await?;
    let total = context.images.count_live().await?;
    let mut items = Vec::with_capacity(rows.len());
    for image in rows {
        items.push(context.ingest.to_dto(image).await);
    }
    Ok(ok(PagedImages {
        items,
        page,
        page_size,
        total,
    }))
}

pub async fn get_one(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<ImageDto>>> {
    let image = context
        .images
        .get_live(id)
        .await?
        .ok_or_else(|| AppError::not_found("image not found"))?;
    Ok(ok(context.ingest.to_dto(image).await))
}

pub async fn update(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateImageRequest>,
) -> AppResult<Json<ApiResponse<ImageDto>>> {
    let image = context
        .images
        .update_metadata(
            id,
            request.original_name.as_deref(),
            request.taken_at,
            request.latitude,
            request.longitude,
            request.location_name.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::not_found("image not found"))?;

    if let Some(tag_ids) = request.tag_ids {
        context.tags.detach_all(id).await?;
        for tag_id in tag_ids {
            context.tags.attach(id, tag_id).await?;
        }
    }
    Ok(ok(context.ingest.to_dto(image).await))
}

pub async fn delete_one(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<u64>>> {
    let affected = context.trash.soft_delete(&[id]).await?;
    if affected == 0 {
        return Err(AppError::not_found("image not found"));
    }
    Ok(ok(affected))
}

pub async fn batch_delete(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<BatchIdsRequest>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context.trash.soft_delete(&request.ids).await?))
}

/// Streams a stored-entry ZIP of the selected originals.
pub async fn batch_download(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<BatchIdsRequest>,
) -> AppResult<Response> {
    let images = context.images.list_by_ids(&request.ids).await?;
    if images.is_empty() {
        return Err(AppError::not_found("no images selected"));
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut archive = ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for image in &images {
            let (mut stream, _) = context
                .storage
                .download(Some(&image.storage_id), &image.storage_path)
                .await?;
            // Entry names stay unique even when originals collide.
            let entry_name = format!("{}-{}", image.id, image.original_name);
            archive
                .start_file(entry_name, options)
                .map_err(|error| AppError::Internal(error.into()))?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|error| AppError::Internal(error.into()))?;
                archive
                    .write_all(&chunk)
                    .map_err(|error| AppError::Internal(error.into()))?;
            }
        }
        archive
            .finish()
            .map_err(|error| AppError::Internal(error.into()))?;
    }

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"images.zip\"".to_string(),
            ),
        ],
        cursor.into_inner(),
    )
        .into_response())
}

/// Proxy for drivers without public URLs.
pub async fn file(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let image = context
        .images
        .get_live(id)
        .await?
        .ok_or_else(|| AppError::not_found("image not found"))?;
    let (stream, size) = context
        .storage
        .download(Some(&image.storage_id), &image.storage_path)
        .await?;
    stream_response(stream, size, &image.mime)
}

pub async fn thumbnail(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let image = context
        .images
        .get_live(id)
        .await?
        .ok_or_else(|| AppError::not_found("image not found"))?;
    let thumbnail_path = image
        .thumbnail_path
        .as_ref()
        .ok_or_else(|| AppError::not_found("image has no thumbnail"))?;
    let driver = context.storage.thumbnail_driver()?;
    let (stream, size) = driver.download(thumbnail_path).await?;
    stream_response(stream, size, "image/jpeg")
}

fn stream_response(stream: ByteStream, size: u64, content_type: &str) -> AppResult<Response> {
    let body = Body::from_stream(stream);
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}

pub async fn prepare_upload(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<PrepareUploadRequest>,
) -> AppResult<Json<ApiResponse<PrepareUploadResponse>>> {
    Ok(ok(context.ingest.prepare(request).await?))
}

pub async fn confirm_upload(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<ConfirmUploadRequest>,
) -> AppResult<Json<ApiResponse<ConfirmUploadResponse>>> {
    Ok(ok(context.ingest.confirm(request.upload_id).await?))
}

/// Single-step fallback for clients that cannot run the three-step
/// protocol.
pub async fn upload(
    State(context): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<ConfirmUploadResponse>>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::bad_request(error.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .unwrap_or("upload.bin")
            .to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|error| AppError::bad_request(error.to_string()))?;
        let response = context
            .ingest
            .upload_direct(&file_name, &content_type, bytes.to_vec())
            .await?;
        return Ok(ok(response));
    }
    Err(AppError::bad_request("multipart field 'file' is required"))
}

#[derive(Debug, Deserialize)]
pub struct UploadDataQuery {
    pub expires: i64,
    pub token: String,
}

/// Token-authenticated blob sink for the three-step protocol; lives outside
/// the JWT middleware because the token in the URL is the credential.
pub async fn upload_data(
    State(context): State<Arc<AppContext>>,
    Path((upload_id, slot)): Path<(Uuid, String)>,
    Query(query): Query<UploadDataQuery>,
    request: Request,
) -> AppResult<Json<ApiResponse<u64>>> {
    let slot = UploadSlot::from_str(&slot)
        .map_err(|_| AppError::bad_request("slot must be original or thumbnail"))?;
    let body: ByteStream = Box::pin(
        request
            .into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other)),
    );
    let written = context
        .ingest
        .receive_blob(upload_id, slot, query.expires, &query.token, body)
        .await?;
    Ok(ok(written))
}

pub async fn clusters(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<ClustersQuery>,
) -> AppResult<Json<ApiResponse<Vec<MapClusterDto>>>> {
    let bbox = BoundingBox::parse(&query.bbox)
        .ok_or_else(|| AppError::bad_request("bbox must be minLng,minLat,maxLng,maxLat"))?;
    let clusters = context.search.map_clusters(bbox, query.zoom).await?;

    let mut result = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let cover_thumbnail_url = context
            .images
            .get_live(cluster.cover_image_id)
            .await?
            .and_then(|image| context.storage.thumbnail_url(&image));
        result.push(MapClusterDto {
            cell: format!("{}:{}", cluster.cell_x as i64, cluster.cell_y as i64),
            latitude: cluster.latitude,
            longitude: cluster.longitude,
            count: cluster.count,
            cover_image_id: cluster.cover_image_id,
            cover_thumbnail_url,
        });
    }
    Ok(ok(result))
}

pub async fn geo_bounds(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Option<GeoBoundsDto>>>> {
    let bounds = context.images.geo_bounds().await?.map(|bounds| GeoBoundsDto {
        min_latitude: bounds.min_latitude,
        max_latitude: bounds.max_latitude,
        min_longitude: bounds.min_longitude,
        max_longitude: bounds.max_longitude,
    });
    Ok(ok(bounds))
}

pub async fn trash_list(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<Vec<ImageDto>>>> {
    let rows = context.trash.list_trash().await?;
    let mut items = Vec::with_capacity(rows.len());
    for image in rows {
        items.push(context.ingest.to_dto(image).await);
    }
    Ok(ok(items))
}

pub async fn trash_restore(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<BatchIdsRequest>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context.trash.restore(&request.ids).await?))
}

pub async fn trash_delete(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<BatchIdsRequest>,
) -> AppResult<Json<ApiResponse<u64>>> {
    Ok(ok(context
        .trash
        .delete_permanently_by_ids(&request.ids)
        .await?))
}
