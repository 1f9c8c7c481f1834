use bytes::Bytes;
use futures_util::stream;
use serde_json::json;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use lumen_photos::entities::{ImageExif, NewImage, SettingCategory};
use lumen_photos::repositories::{ImageRepository, SettingRepository, ensure_schema};
use lumen_photos::services::{SettingsService, TrashService};
use lumen_photos::storage::{
    ByteStream, LocalDriverConfig, StorageBackendConfig, StorageEntryConfig, StorageManager,
    StorageSettings,
};
use lumen_photos::ws::NotificationHub;

async fn setup_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    PgPool::connect(&url).await.ok()
}

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "lumen_photos_{label}_{}_{}",
        std::process::id(),
        nanos
    ))
}

fn local_storage_settings(root: &Path) -> StorageSettings {
    StorageSettings {
        drivers: vec![StorageEntryConfig {
            id: "local".to_string(),
            name: "Test library".to_string(),
            backend: StorageBackendConfig::Local(LocalDriverConfig {
                root: root.to_string_lossy().into_owned(),
                public_base_url: None,
            }),
        }],
        default_id: "local".to_string(),
        thumbnail_id: "local".to_string(),
    }
}

/// Spec retention scenario: soft-delete at t0 with autoDeleteDays=1; a
/// sweep at t0+25h removes the row and the blob.
#[tokio::test]
async fn sweep_permanently_deletes_expired_trash() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let root = unique_temp_dir("sweep");
    let storage = Arc::new(StorageManager::new());
    storage
        .rebuild(&local_storage_settings(&root))
        .expect("storage rebuild failed");

    let settings = Arc::new(
        SettingsService::load(SettingRepository::new(pool.clone()))
            .await
            .expect("load settings"),
    );
    settings
        .update_category(SettingCategory::Retention, json!({ "autoDeleteDays": 1 }))
        .await
        .expect("retention update failed");

    let images = ImageRepository::new(pool.clone());
    let storage_path = format!("2024/01/01/{}.bin", Uuid::new_v4());
    let body: ByteStream = Box::pin(stream::once(async {
        Ok(Bytes::from_static(b"sweep-me"))
    }));
    storage
        .upload(Some("local"), &storage_path, body, "application/octet-stream")
        .await
        .expect("blob upload failed");
    let image = images
        .insert(&NewImage {
            uuid: Uuid::new_v4(),
            hash: format!("{:0>64}", Uuid::new_v4().simple()),
            original_name: "sweep.bin".to_string(),
            mime: "application/octet-stream".to_string(),
            bytes: 8,
            width: None,
            height: None,
            exif: ImageExif::default(),
            storage_id: "local".to_string(),
            storage_path: storage_path.clone(),
            thumbnail_path: None,
            thumbnail_width: None,
            thumbnail_height: None,
        })
        .await
        .expect("image insert failed");

    let trash = TrashService::new(
        images.clone(),
        storage.clone(),
        settings,
        Arc::new(NotificationHub::new()),
    );
    assert_eq!(
        trash.soft_delete(&[image.id]).await.expect("soft delete failed"),
        1
    );

    // Blob untouched by the soft delete.
    let driver = storage.driver_for(Some("local")).expect("driver lookup");
    assert!(driver.exists(&storage_path).await.expect("exists failed"));

    // t0 + 25h: push the deletion timestamp past the retention window.
    sqlx::query("UPDATE images SET deleted_at = now() - interval '25 hours' WHERE id = $1")
        .bind(image.id)
        .execute(&pool)
        .await
        .expect("backdating failed");

    trash.sweep_once().await.expect("sweep failed");

    assert!(
        images.get(image.id).await.expect("row lookup failed").is_none(),
        "row survived the sweep"
    );
    assert!(
        !driver.exists(&storage_path).await.expect("exists failed"),
        "blob survived the sweep"
    );

    let _ = std::fs::remove_dir_all(&root);
}
