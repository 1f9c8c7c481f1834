use image::{ImageBuffer, ImageFormat, Rgb};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lumen_photos::dtos::image_dtos::PrepareUploadRequest;
use lumen_photos::repositories::{
    AiQueueRepository, EmbeddingRepository, ImageRepository, SettingRepository, TagRepository,
    ensure_schema,
};
use lumen_photos::services::ai::{
    AiQueueManager, ImageEmbeddingProcessor, ModelClient, ModelLoadBalancer, TaskProcessor,
};
use lumen_photos::services::{IngestService, SettingsService};
use lumen_photos::storage::{
    LocalDriverConfig, StorageBackendConfig, StorageEntryConfig, StorageManager, StorageSettings,
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

fn random_png() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let buffer = ImageBuffer::from_fn(32, 32, |_, _| {
        Rgb([rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(buffer)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode sample png");
    bytes
}

async fn build_ingest(pool: &PgPool, root: &Path) -> Arc<IngestService> {
    let images = ImageRepository::new(pool.clone());
    let tags = TagRepository::new(pool.clone());
    let queues = AiQueueRepository::new(pool.clone());
    let embeddings = EmbeddingRepository::new(pool.clone());
    let settings = Arc::new(
        SettingsService::load(SettingRepository::new(pool.clone()))
            .await
            .expect("load settings"),
    );
    let storage = Arc::new(StorageManager::new());
    storage
        .rebuild(&local_storage_settings(root))
        .expect("storage rebuild failed");
    let hub = Arc::new(NotificationHub::new());
    let balancer = Arc::new(ModelLoadBalancer::new());
    let client = Arc::new(ModelClient::new());
    let processors: Vec<Arc<dyn TaskProcessor>> = vec![Arc::new(ImageEmbeddingProcessor::new(
        images.clone(),
        embeddings,
        queues.clone(),
        storage.clone(),
        client.clone(),
    ))];
    let ai = Arc::new(AiQueueManager::new(
        queues,
        hub.clone(),
        settings.clone(),
        balancer,
        client,
        processors,
    ));
    Arc::new(IngestService::new(images, tags, storage, settings, hub, ai))
}

#[tokio::test]
async fn reuploading_identical_bytes_returns_the_existing_image() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let root = unique_temp_dir("dedup");
    let ingest = build_ingest(&pool, &root).await;
    let images = ImageRepository::new(pool.clone());
    let bytes = random_png();

    let first = ingest
        .upload_direct("A.png", "image/png", bytes.clone())
        .await
        .expect("first upload failed");
    assert!(!first.is_duplicate);

    let count_after_first = images.count_live().await.expect("count failed");

    let second = ingest
        .upload_direct("A2.png", "image/png", bytes)
        .await
        .expect("second upload failed");
    assert!(second.is_duplicate, "same bytes must dedup");
    assert_eq!(second.image.image.id, first.image.image.id);

    let count_after_second = images.count_live().await.expect("count failed");
    assert_eq!(count_after_first, count_after_second, "no second row");

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn preparing_a_known_hash_short_circuits_without_a_second_row() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let root = unique_temp_dir("dedup_prepare");
    let ingest = build_ingest(&pool, &root).await;
    let images = ImageRepository::new(pool.clone());
    let bytes = random_png();
    let hash = hex::encode(Sha256::digest(&bytes));

    let uploaded = ingest
        .upload_direct("B.png", "image/png", bytes)
        .await
        .expect("upload failed");
    let existing_id = uploaded.image.image.id;
    let count_before = images.count_live().await.expect("count failed");

    let request = PrepareUploadRequest {
        hash: hash.clone(),
        size: 1234,
        width: Some(32),
        height: Some(32),
        mime: "image/png".to_string(),
        name: "B-copy.png".to_string(),
        thumbnail_width: None,
        thumbnail_height: None,
        exif: None,
    };
    let first_prepare = ingest
        .prepare(request.clone())
        .await
        .expect("prepare failed");
    assert!(first_prepare.is_duplicate);
    assert!(first_prepare.upload_tokens.is_none(), "no tokens for a duplicate");
    assert_eq!(
        first_prepare
            .existing_image
            .as_ref()
            .map(|dto| dto.image.id),
        Some(existing_id)
    );

    // A second prepare answers identically and still creates nothing.
    let second_prepare = ingest.prepare(request).await.expect("prepare failed");
    assert!(second_prepare.is_duplicate);
    assert_eq!(
        second_prepare
            .existing_image
            .as_ref()
            .map(|dto| dto.image.id),
        Some(existing_id)
    );
    assert_eq!(
        images.count_live().await.expect("count failed"),
        count_before
    );

    let _ = std::fs::remove_dir_all(&root);
}
