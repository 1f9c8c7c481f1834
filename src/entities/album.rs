use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cover_image_id: Option<i64>,
    pub is_smart: bool,
    /// Present only on smart albums: algorithm, parameters and the
    /// generation timestamp recorded when clustering produced the album.
    pub smart_config: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AlbumWithCount {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cover_image_id: Option<i64>,
    pub is_smart: bool,
    pub smart_config: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub image_count: i64,
}
