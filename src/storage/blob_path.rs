use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

/// Canonical blob layout: originals under `yyyy/mm/dd/{uuid}.{ext}`,
/// thumbnails under `thumb/yyyy/mm/dd/{uuid}.jpg`.
pub struct BlobPath;

impl BlobPath {
    const THUMBNAIL_PREFIX: &'static str = "thumb";
    const THUMBNAIL_EXTENSION: &'static str = "jpg";

    pub fn original(now: DateTime<Utc>, uuid: Uuid, original_name: &str) -> String {
        let extension = Self::extension_of(original_name);
        format!(
            "{:04}/{:02}/{:02}/{}.{}",
            now.year(),
            now.month(),
            now.day(),
            uuid,
            extension
        )
    }

    pub fn thumbnail(now: DateTime<Utc>, uuid: Uuid) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}.{}",
            Self::THUMBNAIL_PREFIX,
            now.year(),
            now.month(),
            now.day(),
            uuid,
            Self::THUMBNAIL_EXTENSION
        )
    }

    /// Lowercased extension of the original file name, `bin` when absent.
    pub fn extension_of(file_name: &str) -> String {
        std::path::Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "bin".to_string())
    }
}
