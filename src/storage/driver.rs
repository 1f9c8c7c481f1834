use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Byte stream flowing between drivers and callers.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Retryable: network hiccups, throttling, 5xx responses.
    #[error("transient storage error: {0}")]
    Transient(String),
    /// Not retryable: the backend rejected the operation or the input.
    #[error("storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                StorageError::PermissionDenied(error.to_string())
            }
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
                StorageError::Transient(error.to_string())
            }
            _ => StorageError::Permanent(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageCapacity {
    pub used_bytes: u64,
    /// None when the backend does not report a limit.
    pub total_bytes: Option<u64>,
}

/// Uniform blob contract every backend implements. Paths are posix-like and
/// driver-scoped; drivers never see each other.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Streams `body` to `path`, returning the byte count written.
    async fn upload(
        &self,
        path: &str,
        body: ByteStream,
        content_type: &str,
    ) -> Result<u64, StorageError>;

    async fn download(&self, path: &str) -> Result<(ByteStream, u64), StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    async fn stat(&self, path: &str) -> Result<BlobStat, StorageError>;

    /// Publicly reachable URL for the blob, or None when reads must be
    /// proxied through the backend API.
    fn url_for(&self, path: &str) -> Option<String>;

    /// Presigned direct-upload URL scoped to exactly `path`, or None when
    /// uploads go through the server.
    async fn presign_put(&self, _path: &str, _expires_in: Duration) -> Option<String> {
        None
    }

    /// Best-effort usage numbers for telemetry.
    async fn capacity(&self) -> Result<StorageCapacity, StorageError>;
}

/// Rejects empty, absolute and parent-traversing paths before they reach a
/// backend.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() {
        return Err(StorageError::Permanent("empty blob path".to_string()));
    }
    if path.starts_with('/') {
        return Err(StorageError::Permanent(format!(
            "absolute blob path not allowed: {path}"
        )));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::Permanent(format!(
            "parent traversal not allowed: {path}"
        )));
    }
    Ok(())
}
