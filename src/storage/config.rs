use serde::{Deserialize, Serialize};

use crate::storage::aliyun_driver::AliyunDriverConfig;
use crate::storage::s3_driver::S3DriverConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDriverConfig {
    pub root: String,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StorageBackendConfig {
    Local(LocalDriverConfig),
    S3(S3DriverConfig),
    Aliyun(AliyunDriverConfig),
}

impl StorageBackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageBackendConfig::Local(_) => "local",
            StorageBackendConfig::S3(_) => "s3",
            StorageBackendConfig::Aliyun(_) => "aliyun",
        }
    }
}

/// One configured driver. Ids are `local` or `<kind>:<accountId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntryConfig {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub backend: StorageBackendConfig,
}

/// The `storage` settings category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    pub drivers: Vec<StorageEntryConfig>,
    pub default_id: String,
    /// Driver holding all thumbnails; must be a local driver.
    pub thumbnail_id: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            drivers: vec![StorageEntryConfig {
                id: "local".to_string(),
                name: "Local library".to_string(),
                backend: StorageBackendConfig::Local(LocalDriverConfig {
                    root: "./data/library".to_string(),
                    public_base_url: None,
                }),
            }],
            default_id: "local".to_string(),
            thumbnail_id: "local".to_string(),
        }
    }
}

/// Validates the `local` / `<kind>:<accountId>` id format.
pub fn validate_storage_id(id: &str) -> bool {
    if id == "local" {
        return true;
    }
    match id.split_once(':') {
        Some((kind, account)) => {
            matches!(kind, "local" | "s3" | "aliyun")
                && !account.is_empty()
                && account
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        None => false,
    }
}
