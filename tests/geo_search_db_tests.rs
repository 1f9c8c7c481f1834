use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use lumen_photos::dtos::search_dtos::SearchRequest;
use lumen_photos::entities::{ImageExif, NewImage};
use lumen_photos::repositories::{EmbeddingRepository, ImageRepository, ensure_schema};
use lumen_photos::services::SearchService;
use lumen_photos::services::ai::{ModelClient, ModelLoadBalancer};

async fn setup_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    PgPool::connect(&url).await.ok()
}

fn search_service(pool: &PgPool) -> SearchService {
    SearchService::new(
        pool.clone(),
        EmbeddingRepository::new(pool.clone()),
        Arc::new(ModelLoadBalancer::new()),
        Arc::new(ModelClient::new()),
    )
}

async fn insert_geotagged(
    images: &ImageRepository,
    latitude: f64,
    longitude: f64,
) -> i64 {
    let exif = ImageExif {
        latitude: Some(latitude),
        longitude: Some(longitude),
        ..ImageExif::default()
    };
    images
        .insert(&NewImage {
            uuid: Uuid::new_v4(),
            hash: format!("{:0>64}", Uuid::new_v4().simple()),
            original_name: "geo.jpg".to_string(),
            mime: "image/jpeg".to_string(),
            bytes: 1024,
            width: None,
            height: None,
            exif,
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

/// Spec geo scenario: a 1 km radius around the image's own coordinates
/// finds it; the same radius ~46 km away does not.
#[tokio::test]
async fn radius_search_matches_only_nearby_images() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let images = ImageRepository::new(pool.clone());
    let id = insert_geotagged(&images, 39.9042, 116.4074).await;
    let search = search_service(&pool);

    let near = search
        .search(
            &SearchRequest {
                latitude: Some(39.9042),
                longitude: Some(116.4074),
                radius_meters: Some(1000.0),
                limit: Some(500),
                ..SearchRequest::default()
            },
            None,
        )
        .await
        .expect("near search failed");
    assert!(
        near.iter().any(|scored| scored.image.id == id),
        "image not found within 1km of its own location"
    );

    let far = search
        .search(
            &SearchRequest {
                latitude: Some(40.0),
                longitude: Some(116.0),
                radius_meters: Some(1000.0),
                limit: Some(500),
                ..SearchRequest::default()
            },
            None,
        )
        .await
        .expect("far search failed");
    assert!(
        !far.iter().any(|scored| scored.image.id == id),
        "image matched a 1km radius tens of kilometres away"
    );
}

#[tokio::test]
async fn zero_radius_matches_only_the_exact_point() {
    let Some(pool) = setup_pool().await else {
        return;
    };
    ensure_schema(&pool).await.expect("schema bootstrap failed");

    let images = ImageRepository::new(pool.clone());
    // Coordinates chosen to be unlikely to collide with other fixtures.
    let id = insert_geotagged(&images, -48.8767, -123.3933).await;
    let search = search_service(&pool);

    let exact = search
        .search(
            &SearchRequest {
                latitude: Some(-48.8767),
                longitude: Some(-123.3933),
                radius_meters: Some(0.0),
                limit: Some(500),
                ..SearchRequest::default()
            },
            None,
        )
        .await
        .expect("exact search failed");
    assert!(exact.iter().any(|scored| scored.image.id == id));

    let offset = search
        .search(
            &SearchRequest {
                latitude: Some(-48.8768),
                longitude: Some(-123.3933),
                radius_meters: Some(0.0),
                limit: Some(500),
                ..SearchRequest::default()
            },
            None,
        )
        .await
        .expect("offset search failed");
    assert!(!offset.iter().any(|scored| scored.image.id == id));
}
