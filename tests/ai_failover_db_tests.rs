use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use bytes::Bytes;
use futures_util::stream;
use serde_json::json;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use lumen_photos::entities::{AiTaskType, ImageExif, NewImage};
use lumen_photos::repositories::{
    AiQueueRepository, EmbeddingRepository, ImageRepository, SettingRepository, ensure_schema,
};
use lumen_photos::services::ai::{
    AiQueueManager, ImageEmbeddingProcessor, ModelClient, ModelLoadBalancer, TaskProcessor,
};
use lumen_photos::services::{AiProviderConfig, AiSettings, SettingsService};
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

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let address = listener.local_addr().expect("mock server address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{address}")
}

fn provider(name: &str, base_url: String, model: &str) -> AiProviderConfig {
    AiProviderConfig {
        name: name.to_string(),
        base_url,
        api_key: "test-key".to_string(),
        models: vec![model.to_string()],
    }
}

/// Spec failover scenario: provider P1 always answers 503, P2 answers. One
/// enqueued image-embedding item must finish via P2 with no failed items
/// and an embedding row present.
#[tokio::test]
async fn item_fails_over_to_the_second_provider() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let root = unique_temp_dir("failover");
    let storage = Arc::new(StorageManager::new());
    storage
        .rebuild(&local_storage_settings(&root))
        .expect("storage rebuild failed");

    // The blob the processor will download and send for embedding.
    let storage_path = format!("2024/01/01/{}.png", Uuid::new_v4());
    let blob = b"not-really-a-png-but-bytes-enough".to_vec();
    let body: ByteStream = {
        let blob = blob.clone();
        Box::pin(stream::once(async move { Ok(Bytes::from(blob)) }))
    };
    storage
        .upload(Some("local"), &storage_path, body, "image/png")
        .await
        .expect("blob upload failed");

    let images = ImageRepository::new(pool.clone());
    let image = images
        .insert(&NewImage {
            uuid: Uuid::new_v4(),
            hash: format!("{:0>64}", Uuid::new_v4().simple()),
            original_name: "failover.png".to_string(),
            mime: "image/png".to_string(),
            bytes: blob.len() as i64,
            width: None,
            height: None,
            exif: ImageExif::default(),
            storage_id: "local".to_string(),
            storage_path,
            thumbnail_path: None,
            thumbnail_width: None,
            thumbnail_height: None,
        })
        .await
        .expect("image insert failed");

    let model = format!("clip-{}", Uuid::new_v4().simple());

    // Keep the backfill scoped to our image: every other live image gets a
    // marker embedding for this throwaway model.
    sqlx::query(
        r#"
        INSERT INTO embeddings (image_id, model_name, vector)
        SELECT id, $1, '[0]'::vector FROM images
        WHERE deleted_at IS NULL AND id <> $2
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&model)
    .bind(image.id)
    .execute(&pool)
    .await
    .expect("marker embeddings failed");

    let p1_hits = Arc::new(AtomicUsize::new(0));
    let p1_router = {
        let hits = p1_hits.clone();
        Router::new().fallback(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
            }
        })
    };
    let p1_url = spawn_server(p1_router).await;

    let p2_router = Router::new().route(
        "/v1/embeddings",
        post(|| async { Json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })) }),
    );
    let p2_url = spawn_server(p2_router).await;

    let queues = AiQueueRepository::new(pool.clone());
    let embeddings = EmbeddingRepository::new(pool.clone());
    let settings = Arc::new(
        SettingsService::load(SettingRepository::new(pool.clone()))
            .await
            .expect("load settings"),
    );
    let hub = Arc::new(NotificationHub::new());
    let balancer = Arc::new(ModelLoadBalancer::new());
    let client = Arc::new(ModelClient::new());
    let processors: Vec<Arc<dyn TaskProcessor>> = vec![Arc::new(ImageEmbeddingProcessor::new(
        images.clone(),
        embeddings.clone(),
        queues.clone(),
        storage.clone(),
        client.clone(),
    ))];
    let manager = Arc::new(AiQueueManager::new(
        queues.clone(),
        hub,
        settings,
        balancer,
        client,
        processors,
    ));

    let ai_settings = AiSettings {
        providers: vec![
            provider("p1", p1_url, &model),
            provider("p2", p2_url, &model),
        ],
        image_embedding_enabled: true,
        tag_embedding_enabled: false,
        aesthetic_enabled: false,
    };
    manager
        .apply_settings(&ai_settings)
        .await
        .expect("apply settings failed");

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if let Some(vector) = embeddings
            .image_vector(image.id, &model)
            .await
            .expect("embedding lookup failed")
        {
            assert_eq!(vector.to_vec(), vec![0.1, 0.2, 0.3]);
            break;
        }
        assert!(
            Instant::now() < deadline,
            "embedding never appeared; failover did not complete"
        );
        sleep(Duration::from_millis(100)).await;
    }

    assert!(
        p1_hits.load(Ordering::SeqCst) >= 1,
        "the failing provider was never attempted"
    );

    let queue = queues
        .get_by_key(&AiTaskType::ImageEmbedding.queue_key(Some(&model)))
        .await
        .expect("queue lookup failed")
        .expect("queue missing");
    assert_eq!(queue.failed_count, 0, "item must not be marked failed");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let queue = queues
            .get_by_key(&AiTaskType::ImageEmbedding.queue_key(Some(&model)))
            .await
            .expect("queue lookup failed")
            .expect("queue missing");
        if queue.pending_count == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "queue never drained");
        sleep(Duration::from_millis(100)).await;
    }

    manager.shutdown().await;
    let _ = std::fs::remove_dir_all(&root);
}
