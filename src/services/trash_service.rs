use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::entities::Image;
use crate::errors::AppResult;
use crate::repositories::ImageRepository;
use crate::services::settings_service::SettingsService;
use crate::storage::StorageManager;
use crate::ws::{NotificationHub, message_types};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SWEEP_BATCH: i64 = 100;

/// Soft-delete, restore and the hourly permanent-deletion sweep.
pub struct TrashService {
    images: ImageRepository,
    storage: Arc<StorageManager>,
    settings: Arc<SettingsService>,
    hub: Arc<NotificationHub>,
}

impl TrashService {
    pub fn new(
        images: ImageRepository,
        storage: Arc<StorageManager>,
        settings: Arc<SettingsService>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            images,
            storage,
            settings,
            hub,
        }
    }

    /// Marks rows deleted; blobs stay until the retention sweep.
    pub async fn soft_delete(&self, ids: &[i64]) -> AppResult<u64> {
        let affected = self.images.soft_delete(ids).await?;
        if affected > 0 {
            self.notify(message_types::IMAGES_DELETED, json!({ "ids": ids }));
            self.broadcast_count().await;
        }
        Ok(affected)
    }

    pub async fn restore(&self, ids: &[i64]) -> AppResult<u64> {
        let affected = self.images.restore(ids).await?;
        if affected > 0 {
            self.notify(message_types::IMAGES_UPDATED, json!({ "ids": ids }));
            self.broadcast_count().await;
        }
        Ok(affected)
    }

    pub async fn list_trash(&self) -> AppResult<Vec<Image>> {
        Ok(self.images.list_trash().await?)
    }

    /// Row first, then blobs: orphaned blobs are tolerated, a dangling row
    /// pointing at deleted blobs is not.
    pub async fn delete_permanently(&self, image: &Image) -> Result<()> {
        let removed = self.images.delete_row(image.id).await?;
        if !removed {
            return Ok(());
        }

        if let Err(error) = self
            .storage
            .delete(Some(&image.storage_id), &image.storage_path)
            .await
        {
            log::warn!(
                "blob delete failed for image {} ({}): {error}",
                image.id,
                image.storage_path
            );
        }
        if let Some(thumbnail_path) = &image.thumbnail_path {
            match self.storage.thumbnail_driver() {
                Ok(driver) => {
                    if let Err(error) = driver.delete(thumbnail_path).await {
                        log::warn!(
                            "thumbnail delete failed for image {} ({thumbnail_path}): {error}",
                            image.id
                        );
                    }
                }
                Err(error) => log::warn!("thumbnail driver unavailable: {error}"),
            }
        }
        Ok(())
    }

    pub async fn delete_permanently_by_ids(&self, ids: &[i64]) -> AppResult<u64> {
        let mut deleted = 0;
        for id in ids {
            if let Some(image) = self.images.get(*id).await? {
                self.delete_permanently(&image)
                    .await
                    .map_err(crate::errors::AppError::Internal)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.notify(message_types::IMAGES_DELETED, json!({ "ids": ids }));
            self.broadcast_count().await;
        }
        Ok(deleted)
    }

    /// One sweep pass: permanently delete trash older than the retention
    /// window, in batches.
    pub async fn sweep_once(&self) -> Result<u64> {
        let retention_days = self.settings.snapshot()?.retention.auto_delete_days;
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let mut total = 0u64;
        loop {
            let expired = self.images.expired_trash(cutoff, SWEEP_BATCH).await?;
            if expired.is_empty() {
                break;
            }
            for image in &expired {
                self.delete_permanently(image).await?;
                total += 1;
            }
            if (expired.len() as i64) < SWEEP_BATCH {
                break;
            }
        }
        if total > 0 {
            log::info!("retention sweep removed {total} expired image(s)");
            self.broadcast_count().await;
        }
        Ok(total)
    }

    /// Hourly sweep loop; exits when shutdown flips.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        log::error!("retention sweep failed: {error:#}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn broadcast_count(&self) {
        if let Ok(count) = self.images.count_live().await {
            self.notify(message_types::IMAGE_COUNT, json!({ "count": count }));
        }
    }

    /// Hub errors never fail the deletion that triggered them.
    fn notify(&self, message_type: &str, data: serde_json::Value) {
        if let Err(error) = self.hub.broadcast(message_type, data) {
            log::warn!("trash broadcast failed: {error:#}");
        }
    }
}
