use async_trait::async_trait;
use axum::http::Method;
use bytes::BytesMut;
use futures_util::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use std::time::Duration;

use crate::storage::driver::{
    BlobStat, ByteStream, StorageCapacity, StorageDriver, StorageError, validate_path,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3DriverConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    /// Base URL for anonymous reads when the bucket is public; None keeps
    /// reads behind the backend proxy.
    pub public_base_url: Option<String>,
}

/// S3-compatible driver (AWS, MinIO, R2 and friends).
pub struct S3Driver {
    id: String,
    name: String,
    store: AmazonS3,
    public_base_url: Option<String>,
}

impl S3Driver {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: &S3DriverConfig,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        let store = builder
            .build()
            .map_err(|error| StorageError::Permanent(error.to_string()))?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            store,
            public_base_url: config.public_base_url.clone(),
        })
    }

    fn object_path(path: &str) -> Result<ObjectPath, StorageError> {
        validate_path(path)?;
        ObjectPath::parse(path).map_err(|error| StorageError::Permanent(error.to_string()))
    }

    fn map_error(error: object_store::Error) -> StorageError {
        match error {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            object_store::Error::PermissionDenied { path, .. } => {
                StorageError::PermissionDenied(path)
            }
            object_store::Error::Unauthenticated { path, .. } => {
                StorageError::PermissionDenied(path)
            }
            object_store::Error::InvalidPath { .. } | object_store::Error::NotImplemented => {
                StorageError::Permanent(error.to_string())
            }
            other => StorageError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        path: &str,
        mut body: ByteStream,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let object_path = Self::object_path(path)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let size = buffer.len() as u64;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&object_path, buffer.freeze().into(), options)
            .await
            .map_err(Self::map_error)?;
        Ok(size)
    }

    async fn download(&self, path: &str) -> Result<(ByteStream, u64), StorageError> {
        let object_path = Self::object_path(path)?;
        let result = self
            .store
            .get(&object_path)
            .await
            .map_err(Self::map_error)?;
        let size = result.meta.size;
        let stream: ByteStream = Box::pin(
            result
                .into_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        Ok((stream, size))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let object_path = Self::object_path(path)?;
        match self.store.delete(&object_path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(error) => Err(Self::map_error(error)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn stat(&self, path: &str) -> Result<BlobStat, StorageError> {
        let object_path = Self::object_path(path)?;
        let meta = self
            .store
            .head(&object_path)
            .await
            .map_err(Self::map_error)?;
        Ok(BlobStat {
            size: meta.size,
            modified: Some(meta.last_modified),
        })
    }

    fn url_for(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), path))
    }

    async fn presign_put(&self, path: &str, expires_in: Duration) -> Option<String> {
        let object_path = Self::object_path(path).ok()?;
        self.store
            .signed_url(Method::PUT, &object_path, expires_in)
            .await
            .ok()
            .map(|url| url.to_string())
    }

    async fn capacity(&self) -> Result<StorageCapacity, StorageError> {
        // Object stores do not report usage; telemetry shows zeros.
        Ok(StorageCapacity::default())
    }
}
