use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dtos::image_dtos::ImageDto;

/// Union of optional filters; everything present AND-combines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub keyword: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_meters: Option<f64>,
    /// `minLng,minLat,maxLng,maxLat` map viewport filter.
    pub bbox: Option<String>,
    /// Model scoping the semantic part; required with `text` or a query
    /// image.
    pub model_name: Option<String>,
    pub text: Option<String>,
    /// Re-rank against an existing image's embedding.
    pub image_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultDto {
    #[serde(flatten)]
    pub image: ImageDto,
    /// Cosine distance to the semantic query, absent for pure-filter
    /// searches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub items: Vec<SearchResultDto>,
    pub total: usize,
}
