use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dtos::image_dtos::ImageDto;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub image_ids: Vec<i64>,
    pub password: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfoDto {
    pub code: String,
    pub has_password: bool,
    pub expire_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub image_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareAccessRequest {
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareImagesResponse {
    pub images: Vec<ImageDto>,
}
