use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use crate::storage::driver::{
    BlobStat, ByteStream, StorageCapacity, StorageDriver, StorageError, validate_path,
};

/// Filesystem-backed driver rooted at a single directory. Writes land in a
/// sibling temp file first and are renamed into place.
pub struct LocalDriver {
    id: String,
    name: String,
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalDriver {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn disk_of_root(disks: &Disks, root: &Path) -> Option<(u64, u64)> {
        let root_text = root.to_string_lossy().to_ascii_lowercase();
        disks
            .list()
            .iter()
            .filter(|disk| !disk.mount_point().as_os_str().is_empty())
            .filter(|disk| {
                root_text.starts_with(&disk.mount_point().to_string_lossy().to_ascii_lowercase())
            })
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| (disk.total_space(), disk.available_space()))
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        path: &str,
        body: ByteStream,
        _content_type: &str,
    ) -> Result<u64, StorageError> {
        let destination = self.resolve(path)?;
        let parent = destination
            .parent()
            .ok_or_else(|| StorageError::Permanent(format!("invalid blob path: {path}")))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut reader = StreamReader::new(body);
        let mut file = fs::File::create(&temp_path).await?;
        let written = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(written) => written,
            Err(error) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(error.into());
            }
        };
        file.flush().await?;
        drop(file);

        if let Err(error) = fs::rename(&temp_path, &destination).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error.into());
        }
        Ok(written)
    }

    async fn download(&self, path: &str) -> Result<(ByteStream, u64), StorageError> {
        let source = self.resolve(path)?;
        let file = fs::File::open(&source)
            .await
            .map_err(|_| StorageError::NotFound(path.to_string()))?;
        let size = file.metadata().await?.len();
        let stream: ByteStream = Box::pin(ReaderStream::new(file));
        Ok((stream, size))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }

    async fn stat(&self, path: &str) -> Result<BlobStat, StorageError> {
        let target = self.resolve(path)?;
        let metadata = fs::metadata(&target)
            .await
            .map_err(|_| StorageError::NotFound(path.to_string()))?;
        let modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        Ok(BlobStat {
            size: metadata.len(),
            modified,
        })
    }

    fn url_for(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), path))
    }

    async fn presign_put(&self, _path: &str, _expires_in: Duration) -> Option<String> {
        None
    }

    async fn capacity(&self) -> Result<StorageCapacity, StorageError> {
        let root = self.root.clone();
        let capacity = tokio::task::spawn_blocking(move || {
            let disks = Disks::new_with_refreshed_list();
            Self::disk_of_root(&disks, &root)
        })
        .await
        .map_err(|error| StorageError::Permanent(error.to_string()))?;

        match capacity {
            Some((total, available)) => Ok(StorageCapacity {
                used_bytes: total.saturating_sub(available),
                total_bytes: Some(total),
            }),
            None => Ok(StorageCapacity::default()),
        }
    }
}
