use axum::Json;
use axum::Router;
use axum::routing::post;
use pgvector::Vector;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use lumen_photos::dtos::search_dtos::SearchRequest;
use lumen_photos::entities::{ImageExif, NewImage};
use lumen_photos::repositories::{
    EmbeddingRepository, ImageRepository, TagRepository, ensure_schema,
};
use lumen_photos::services::ai::{ModelClient, ModelLoadBalancer};
use lumen_photos::services::{AiProviderConfig, AiSettings, SearchService};

async fn setup_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    PgPool::connect(&url).await.ok()
}

async fn spawn_embedding_server() -> String {
    let router = Router::new().route(
        "/v1/embeddings",
        post(|| async { Json(json!({ "embeddings": [[1.0, 0.0, 0.0]] })) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let address = listener.local_addr().expect("mock server address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{address}")
}

async fn insert_image(images: &ImageRepository, name: &str) -> i64 {
    images
        .insert(&NewImage {
            uuid: Uuid::new_v4(),
            hash: format!("{:0>64}", Uuid::new_v4().simple()),
            original_name: name.to_string(),
            mime: "image/jpeg".to_string(),
            bytes: 2048,
            width: None,
            height: None,
            exif: ImageExif::default(),
            storage_id: "local".to_string(),
            storage_path: format!("2024/01/01/{}.jpg", Uuid::new_v4()),
            thumbnail_path: None,
            thumbnail_width: None,
            thumbnail_height: None,
        })
        .await
        .expect("image insert failed")
        .id
}

async fn tag(tags: &TagRepository, image_id: i64, name: &str) {
    let tag = tags
        .get_or_create(name, None)
        .await
        .expect("tag create failed");
    tags.attach(image_id, tag.id).await.expect("attach failed");
}

/// Spec hybrid scenario: tag filters AND-combine with the semantic query;
/// only images carrying every tag are candidates, ordered by cosine
/// distance against the named model.
#[tokio::test]
async fn tag_filter_and_semantic_query_compose() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let images = ImageRepository::new(pool.clone());
    let tags = TagRepository::new(pool.clone());
    let embeddings = EmbeddingRepository::new(pool.clone());
    let model = format!("clip-{}", Uuid::new_v4().simple());

    // A: {sea, sunset}, close to the query vector.
    // B: {sea, night}, excluded by the tag filter.
    // C: {sea, sunset}, further from the query vector than A.
    let image_a = insert_image(&images, "sea-sunset.jpg").await;
    let image_b = insert_image(&images, "sea-night.jpg").await;
    let image_c = insert_image(&images, "sea-sunset-2.jpg").await;
    tag(&tags, image_a, "sea").await;
    tag(&tags, image_a, "sunset").await;
    tag(&tags, image_b, "sea").await;
    tag(&tags, image_b, "night").await;
    tag(&tags, image_c, "sea").await;
    tag(&tags, image_c, "sunset").await;

    embeddings
        .upsert_image(image_a, &model, Vector::from(vec![0.9, 0.1, 0.0]))
        .await
        .expect("embedding upsert failed");
    embeddings
        .upsert_image(image_b, &model, Vector::from(vec![0.0, 1.0, 0.0]))
        .await
        .expect("embedding upsert failed");
    embeddings
        .upsert_image(image_c, &model, Vector::from(vec![0.5, 0.5, 0.0]))
        .await
        .expect("embedding upsert failed");

    let provider_url = spawn_embedding_server().await;
    let balancer = Arc::new(ModelLoadBalancer::new());
    balancer
        .rebuild(&AiSettings {
            providers: vec![AiProviderConfig {
                name: "mock".to_string(),
                base_url: provider_url,
                api_key: "test-key".to_string(),
                models: vec![model.clone()],
            }],
            ..AiSettings::default()
        })
        .expect("balancer rebuild failed");

    let search = SearchService::new(
        pool.clone(),
        embeddings,
        balancer,
        Arc::new(ModelClient::new()),
    );

    let results = search
        .search(
            &SearchRequest {
                tags: vec!["sea".to_string(), "sunset".to_string()],
                model_name: Some(model),
                text: Some("ocean".to_string()),
                limit: Some(50),
                ..SearchRequest::default()
            },
            None,
        )
        .await
        .expect("search failed");

    let ids: Vec<i64> = results.iter().map(|scored| scored.image.id).collect();
    assert!(ids.contains(&image_a), "tagged match missing");
    assert!(ids.contains(&image_c), "tagged match missing");
    assert!(!ids.contains(&image_b), "tag filter leaked a non-match");

    // Cosine ordering against [1,0,0]: A before C.
    let position_a = ids.iter().position(|id| *id == image_a).unwrap();
    let position_c = ids.iter().position(|id| *id == image_c).unwrap();
    assert!(position_a < position_c, "results not ordered by distance");

    for scored in results
        .iter()
        .filter(|scored| scored.image.id == image_a || scored.image.id == image_c)
    {
        assert!(scored.distance.is_some(), "semantic result without a distance");
    }
}
