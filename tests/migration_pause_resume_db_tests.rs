use bytes::Bytes;
use futures_util::{StreamExt, stream};
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use lumen_photos::dtos::migration_dtos::CreateMigrationRequest;
use lumen_photos::entities::{ImageExif, MigrationFilter, MigrationStatus, MigrationType, NewImage};
use lumen_photos::repositories::{
    ImageRepository, MigrationRepository, SettingRepository, ensure_schema,
};
use lumen_photos::services::{MigrationService, SettingsService};
use lumen_photos::storage::{
    ByteStream, LocalDriverConfig, StorageBackendConfig, StorageEntryConfig, StorageManager,
    StorageSettings,
};
use lumen_photos::ws::NotificationHub;

const FILE_COUNT: usize = 60;

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

fn local_entry(id: &str, root: &Path) -> StorageEntryConfig {
    StorageEntryConfig {
        id: id.to_string(),
        name: format!("Test {id}"),
        backend: StorageBackendConfig::Local(LocalDriverConfig {
            root: root.to_string_lossy().into_owned(),
            public_base_url: None,
        }),
    }
}

fn body_of(bytes: Vec<u8>) -> ByteStream {
    Box::pin(stream::once(async move { Ok(Bytes::from(bytes)) }))
}

async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("stream chunk"));
    }
    out
}

/// Spec migration scenario: pause mid-run, resume, and the final state is
/// indistinguishable from an uninterrupted run — full ledger success,
/// every row repointed at the target, bytes equal on the target.
#[tokio::test]
async fn pause_then_resume_finishes_with_every_row_on_the_target() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let run = Uuid::new_v4().simple().to_string();
    let source_id = format!("local:src-{run}");
    let target_id = format!("local:dst-{run}");
    let source_root = unique_temp_dir("migration_src");
    let target_root = unique_temp_dir("migration_dst");

    let storage = Arc::new(StorageManager::new());
    storage
        .rebuild(&StorageSettings {
            drivers: vec![
                local_entry(&source_id, &source_root),
                local_entry(&target_id, &target_root),
            ],
            default_id: source_id.clone(),
            thumbnail_id: source_id.clone(),
        })
        .expect("storage rebuild failed");

    let images = ImageRepository::new(pool.clone());
    let mut originals: HashMap<i64, (String, Vec<u8>)> = HashMap::new();
    for index in 0..FILE_COUNT {
        let uuid = Uuid::new_v4();
        let bytes = format!("blob-{index}-{run}").into_bytes();
        let path = format!("2024/01/01/{uuid}.bin");
        storage
            .upload(Some(&source_id), &path, body_of(bytes.clone()), "application/octet-stream")
            .await
            .expect("seed upload failed");
        let image = images
            .insert(&NewImage {
                uuid,
                hash: format!("{:0>64}", Uuid::new_v4().simple()),
                original_name: format!("file-{index}.bin"),
                mime: "application/octet-stream".to_string(),
                bytes: bytes.len() as i64,
                width: None,
                height: None,
                exif: ImageExif::default(),
                storage_id: source_id.clone(),
                storage_path: path.clone(),
                thumbnail_path: None,
                thumbnail_width: None,
                thumbnail_height: None,
            })
            .await
            .expect("image insert failed");
        originals.insert(image.id, (path, bytes));
    }

    let migrations_repo = MigrationRepository::new(pool.clone());
    let settings = Arc::new(
        SettingsService::load(SettingRepository::new(pool.clone()))
            .await
            .expect("load settings"),
    );
    let service = Arc::new(MigrationService::new(
        migrations_repo.clone(),
        images.clone(),
        storage.clone(),
        settings,
        Arc::new(NotificationHub::new()),
    ));

    let task = service
        .start(CreateMigrationRequest {
            migration_type: MigrationType::Original,
            source_storage_id: source_id.clone(),
            target_storage_id: target_id.clone(),
            filter: MigrationFilter::default(),
            delete_source_after: false,
        })
        .await
        .expect("migration start failed");
    assert_eq!(task.total, FILE_COUNT as i64);

    // Pause as early as possible; the worker may already have raced to
    // completion, which pause correctly rejects.
    let _ = service.pause(task.id).await;

    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let current = service.get(task.id).await.expect("task lookup failed");
        match current.status() {
            Some(MigrationStatus::Completed) => break,
            Some(MigrationStatus::Paused) => {
                service.resume(task.id).await.expect("resume failed");
            }
            Some(MigrationStatus::Failed) | Some(MigrationStatus::Cancelled) => {
                panic!("migration ended in {}", current.status);
            }
            _ => {}
        }
        assert!(Instant::now() < deadline, "migration never completed");
        sleep(Duration::from_millis(100)).await;
    }

    let finished = service.get(task.id).await.expect("task lookup failed");
    assert_eq!(finished.processed, FILE_COUNT as i64);
    assert_eq!(finished.failed, 0);
    assert_eq!(
        migrations_repo
            .pending_count(task.id)
            .await
            .expect("pending count failed"),
        0
    );

    for (id, (path, bytes)) in &originals {
        let row = images
            .get(*id)
            .await
            .expect("row lookup failed")
            .expect("row vanished");
        assert_eq!(row.storage_id, target_id, "row {id} not repointed");

        let (stream, _) = storage
            .download(Some(&target_id), path)
            .await
            .expect("target download failed");
        assert_eq!(&collect(stream).await, bytes, "bytes differ on target");
    }

    let _ = std::fs::remove_dir_all(&source_root);
    let _ = std::fs::remove_dir_all(&target_root);
}
