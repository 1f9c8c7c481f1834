pub mod ai_controller;
pub mod album_controller;
pub mod auth_controller;
pub mod image_controller;
pub mod search_controller;
pub mod settings_controller;
pub mod share_controller;
pub mod storage_controller;
pub mod tag_controller;
pub mod ws_controller;

use axum::Json;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::dtos::ApiResponse;
use crate::middleware::require_auth;

pub(crate) fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok(data))
}

/// The full HTTP surface. Public routes carry their own credentials (login,
/// share code, signed upload token, WS token); everything else sits behind
/// the JWT middleware.
pub fn build_router(context: Arc<AppContext>) -> anyhow::Result<Router> {
    let max_upload = context.settings.snapshot()?.general.max_upload_bytes as usize;

    let public = Router::new()
        .route("/api/auth/login", post(auth_controller::login))
        .route("/api/s/{code}/info", get(share_controller::info))
        .route("/api/s/{code}/images", post(share_controller::images))
        .route(
            "/api/images/upload-data/{upload_id}/{slot}",
            put(image_controller::upload_data),
        )
        .route("/api/ws", get(ws_controller::upgrade));

    let protected = Router::new()
        .route("/api/auth/check", get(auth_controller::check))
        .route("/api/images", get(image_controller::list))
        .route(
            "/api/images/prepare-upload",
            post(image_controller::prepare_upload),
        )
        .route(
            "/api/images/confirm-upload",
            post(image_controller::confirm_upload),
        )
        .route("/api/images/upload", post(image_controller::upload))
        .route("/api/images/batch-delete", post(image_controller::batch_delete))
        .route(
            "/api/images/batch-download",
            post(image_controller::batch_download),
        )
        .route("/api/images/clusters", get(image_controller::clusters))
        .route("/api/images/geo-bounds", get(image_controller::geo_bounds))
        .route("/api/images/trash", get(image_controller::trash_list))
        .route(
            "/api/images/trash/restore",
            post(image_controller::trash_restore),
        )
        .route(
            "/api/images/trash/delete",
            post(image_controller::trash_delete),
        )
        .route(
            "/api/images/{id}",
            get(image_controller::get_one)
                .put(image_controller::update)
                .delete(image_controller::delete_one),
        )
        .route("/api/images/{id}/file", get(image_controller::file))
        .route("/api/images/{id}/thumbnail", get(image_controller::thumbnail))
        .route(
            "/api/search",
            get(search_controller::search_get).post(search_controller::search_post),
        )
        .route("/api/tags", get(tag_controller::list).post(tag_controller::create))
        .route(
            "/api/tags/{id}",
            put(tag_controller::update).delete(tag_controller::delete),
        )
        .route(
            "/api/albums",
            get(album_controller::list).post(album_controller::create),
        )
        .route(
            "/api/albums/smart-generate",
            post(album_controller::smart_generate),
        )
        .route(
            "/api/albums/{id}",
            get(album_controller::get_one)
                .put(album_controller::update)
                .delete(album_controller::delete),
        )
        .route("/api/albums/{id}/images", get(album_controller::images))
        .route(
            "/api/albums/{id}/images/add",
            post(album_controller::add_images),
        )
        .route(
            "/api/albums/{id}/images/remove",
            post(album_controller::remove_images),
        )
        .route(
            "/api/shares",
            get(share_controller::list).post(share_controller::create),
        )
        .route("/api/shares/{id}/deactivate", post(share_controller::deactivate))
        .route("/api/settings", get(settings_controller::list))
        .route(
            "/api/settings/storage",
            get(settings_controller::get_storage).post(settings_controller::add_storage),
        )
        .route(
            "/api/settings/storage/default",
            put(settings_controller::set_default_storage),
        )
        .route(
            "/api/settings/storage/test",
            post(settings_controller::test_storage),
        )
        .route(
            "/api/settings/storage/{id}",
            put(settings_controller::update_storage).delete(settings_controller::remove_storage),
        )
        .route(
            "/api/settings/{category}",
            get(settings_controller::get_category).put(settings_controller::update_category),
        )
        .route("/api/storage/stats", get(storage_controller::stats))
        .route(
            "/api/storage/storage-migration",
            post(storage_controller::create_migration),
        )
        .route(
            "/api/storage/storage-migration/preview",
            post(storage_controller::preview_migration),
        )
        .route(
            "/api/storage/storage-migration/list/active",
            get(storage_controller::list_active),
        )
        .route(
            "/api/storage/storage-migration/{id}/pause",
            post(storage_controller::pause),
        )
        .route(
            "/api/storage/storage-migration/{id}/resume",
            post(storage_controller::resume),
        )
        .route(
            "/api/storage/storage-migration/{id}/cancel",
            post(storage_controller::cancel),
        )
        .route(
            "/api/storage/storage-migration/{id}/retry",
            post(storage_controller::retry),
        )
        .route(
            "/api/storage/storage-migration/{id}/dismiss",
            post(storage_controller::dismiss),
        )
        .route(
            "/api/storage/storage-migration/{id}/failed",
            get(storage_controller::failed_records),
        )
        .route("/api/ai/queues", get(ai_controller::list_queues))
        .route("/api/ai/queues/{id}", get(ai_controller::get_queue))
        .route("/api/ai/queues/{id}/retry", post(ai_controller::retry_queue))
        .route("/api/ai/queues/{id}/clear", post(ai_controller::clear_queue))
        .route(
            "/api/ai/task-items/{id}/retry",
            post(ai_controller::retry_item),
        )
        .route(
            "/api/ai/task-items/{id}/ignore",
            post(ai_controller::ignore_item),
        )
        .route(
            "/api/ai/test-connection",
            post(ai_controller::test_connection),
        )
        .route(
            "/api/ai/smart-albums-generate",
            post(ai_controller::smart_albums_generate),
        )
        .route(
            "/api/ai/smart-albums/{id}/cancel",
            post(ai_controller::smart_albums_cancel),
        )
        .layer(from_fn_with_state(context.clone(), require_auth));

    Ok(public
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(context))
}
