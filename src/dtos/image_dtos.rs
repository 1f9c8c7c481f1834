use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Image, ImageExif, Tag};

/// Image as clients see it: row fields plus resolved URLs and tags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDto {
    #[serde(flatten)]
    pub image: Image,
    pub url: String,
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

/// Query parameters stay snake_case (`page_size`, `sort_by`), matching
/// what existing clients send.
#[derive(Debug, Clone, Deserialize)]
pub struct ListImagesQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedImages {
    pub items: Vec<ImageDto>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// Client-computed facts the server trusts at prepare time and verifies at
/// confirm time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadRequest {
    /// SHA-256 of the raw bytes, lowercase hex.
    pub hash: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub mime: String,
    pub name: String,
    pub thumbnail_width: Option<i32>,
    pub thumbnail_height: Option<i32>,
    #[serde(default)]
    pub exif: Option<ImageExif>,
}

/// Where and how to PUT one blob.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub url: String,
    pub method: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTokens {
    pub original: UploadTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<UploadTarget>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadResponse {
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_image: Option<ImageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_tokens: Option<UploadTokens>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmUploadRequest {
    pub upload_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmUploadResponse {
    pub is_duplicate: bool,
    pub image: ImageDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateImageRequest {
    pub original_name: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub tag_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClustersQuery {
    /// `minLng,minLat,maxLng,maxLat`
    pub bbox: String,
    pub zoom: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapClusterDto {
    pub cell: String,
    pub latitude: f64,
    pub longitude: f64,
    pub count: i64,
    pub cover_image_id: i64,
    pub cover_thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoBoundsDto {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}
