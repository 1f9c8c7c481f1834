use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Message types clients subscribe on.
pub mod message_types {
    pub const AI_QUEUE_STATUS: &str = "ai_queue_status";
    pub const STORAGE_STATS: &str = "storage_stats";
    pub const IMAGE_COUNT: &str = "image_count";
    pub const MIGRATION_PROGRESS: &str = "migration_progress";
    pub const SMART_ALBUM_PROGRESS: &str = "smart_album_progress";
    pub const IMAGES_CREATED: &str = "images_created";
    pub const IMAGES_DELETED: &str = "images_deleted";
    pub const IMAGES_UPDATED: &str = "images_updated";
    pub const ALBUMS_CHANGED: &str = "albums_changed";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// Wire shape of every hub message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: JsonValue,
    pub timestamp: i64,
}

impl WsMessage {
    pub fn new(message_type: &str, data: JsonValue) -> Self {
        Self {
            message_type: message_type.to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn ping() -> Self {
        Self::new(message_types::PING, JsonValue::Null)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
