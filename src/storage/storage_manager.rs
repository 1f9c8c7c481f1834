use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::entities::Image;
use crate::storage::aliyun_driver::AliyunDriver;
use crate::storage::config::{StorageBackendConfig, StorageEntryConfig, StorageSettings, validate_storage_id};
use crate::storage::driver::{ByteStream, StorageCapacity, StorageDriver, StorageError};
use crate::storage::local_driver::LocalDriver;
use crate::storage::s3_driver::S3Driver;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub id: String,
    pub name: String,
    pub used_bytes: u64,
    pub total_bytes: Option<u64>,
    pub active: bool,
}

struct ManagerState {
    drivers: HashMap<String, Arc<dyn StorageDriver>>,
    default_id: String,
    thumbnail_id: String,
}

/// Registry of named drivers keyed by storage id. Rebuilt whenever the
/// storage settings category changes; lookups on removed drivers fail with
/// a permanent error.
pub struct StorageManager {
    state: RwLock<ManagerState>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                drivers: HashMap::new(),
                default_id: "local".to_string(),
                thumbnail_id: "local".to_string(),
            }),
        }
    }

    /// Replaces the driver set from the storage settings category.
    pub fn rebuild(&self, settings: &StorageSettings) -> Result<(), StorageError> {
        let mut drivers: HashMap<String, Arc<dyn StorageDriver>> = HashMap::new();
        for entry in &settings.drivers {
            if !validate_storage_id(&entry.id) {
                return Err(StorageError::Permanent(format!(
                    "invalid storage id: {}",
                    entry.id
                )));
            }
            let driver = Self::build_driver(entry)?;
            drivers.insert(entry.id.clone(), driver);
        }
        if !drivers.contains_key(&settings.default_id) {
            return Err(StorageError::Permanent(format!(
                "default storage id {} is not configured",
                settings.default_id
            )));
        }
        if !drivers.contains_key(&settings.thumbnail_id) {
            return Err(StorageError::Permanent(format!(
                "thumbnail storage id {} is not configured",
                settings.thumbnail_id
            )));
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::Permanent("failed to lock storage registry".to_string()))?;
        state.drivers = drivers;
        state.default_id = settings.default_id.clone();
        state.thumbnail_id = settings.thumbnail_id.clone();
        log::info!(
            "storage manager rebuilt: {} driver(s), default {}",
            state.drivers.len(),
            state.default_id
        );
        Ok(())
    }

    fn build_driver(entry: &StorageEntryConfig) -> Result<Arc<dyn StorageDriver>, StorageError> {
        let driver: Arc<dyn StorageDriver> = match &entry.backend {
            StorageBackendConfig::Local(config) => Arc::new(LocalDriver::new(
                entry.id.clone(),
                entry.name.clone(),
                config.root.clone(),
                config.public_base_url.clone(),
            )),
            StorageBackendConfig::S3(config) => {
                Arc::new(S3Driver::new(entry.id.clone(), entry.name.clone(), config)?)
            }
            StorageBackendConfig::Aliyun(config) => Arc::new(AliyunDriver::new(
                entry.id.clone(),
                entry.name.clone(),
                config.clone(),
            )),
        };
        Ok(driver)
    }

    /// Builds a driver from a candidate config and probes it, without
    /// touching the registry. Used by the storage admin test endpoint.
    pub async fn probe(entry: &StorageEntryConfig) -> Result<StorageCapacity, StorageError> {
        let driver = Self::build_driver(entry)?;
        driver.capacity().await
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, ManagerState>, StorageError> {
        self.state
            .read()
            .map_err(|_| StorageError::Permanent("failed to lock storage registry".to_string()))
    }

    pub fn default_id(&self) -> Result<String, StorageError> {
        Ok(self.read_state()?.default_id.clone())
    }

    /// Resolves a driver by id; None resolves the configured default.
    pub fn driver_for(&self, id: Option<&str>) -> Result<Arc<dyn StorageDriver>, StorageError> {
        let state = self.read_state()?;
        let key = id.unwrap_or(&state.default_id);
        state
            .drivers
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::Permanent(format!("unknown storage id: {key}")))
    }

    pub fn thumbnail_driver(&self) -> Result<Arc<dyn StorageDriver>, StorageError> {
        let thumbnail_id = self.read_state()?.thumbnail_id.clone();
        self.driver_for(Some(&thumbnail_id))
    }

    pub async fn upload(
        &self,
        id: Option<&str>,
        path: &str,
        body: ByteStream,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        self.driver_for(id)?.upload(path, body, content_type).await
    }

    pub async fn download(
        &self,
        id: Option<&str>,
        path: &str,
    ) -> Result<(ByteStream, u64), StorageError> {
        self.driver_for(id)?.download(path).await
    }

    pub async fn delete(&self, id: Option<&str>, path: &str) -> Result<(), StorageError> {
        self.driver_for(id)?.delete(path).await
    }

    /// Public URL of the original blob: the driver's own URL when it serves
    /// one, otherwise the backend proxy route.
    pub fn public_url(&self, image: &Image) -> String {
        match self.driver_for(Some(&image.storage_id)) {
            Ok(driver) => driver
                .url_for(&image.storage_path)
                .unwrap_or_else(|| format!("/api/images/{}/file", image.id)),
            Err(_) => format!("/api/images/{}/file", image.id),
        }
    }

    /// Thumbnails always resolve via the designated thumbnail driver and are
    /// served through the backend.
    pub fn thumbnail_url(&self, image: &Image) -> Option<String> {
        image
            .thumbnail_path
            .as_ref()
            .map(|_| format!("/api/images/{}/thumbnail", image.id))
    }

    /// Capacity per driver for telemetry; a driver that fails to answer is
    /// reported inactive.
    pub async fn multi_stats(&self) -> Result<Vec<StorageStats>, StorageError> {
        let drivers: Vec<Arc<dyn StorageDriver>> =
            self.read_state()?.drivers.values().cloned().collect();

        let mut stats = Vec::with_capacity(drivers.len());
        for driver in drivers {
            match driver.capacity().await {
                Ok(StorageCapacity {
                    used_bytes,
                    total_bytes,
                }) => stats.push(StorageStats {
                    id: driver.id().to_string(),
                    name: driver.name().to_string(),
                    used_bytes,
                    total_bytes,
                    active: true,
                }),
                Err(error) => {
                    log::warn!("capacity probe failed for {}: {error}", driver.id());
                    stats.push(StorageStats {
                        id: driver.id().to_string(),
                        name: driver.name().to_string(),
                        used_bytes: 0,
                        total_bytes: None,
                        active: false,
                    });
                }
            }
        }
        stats.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stats)
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}
