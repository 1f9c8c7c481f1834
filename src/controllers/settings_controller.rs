use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::entities::SettingCategory;
use crate::errors::{AppError, AppResult};
use crate::storage::{StorageEntryConfig, validate_storage_id};

fn parse_category(raw: &str) -> AppResult<SettingCategory> {
    SettingCategory::from_str(raw)
        .map_err(|_| AppError::bad_request(format!("unknown settings category: {raw}")))
}

pub async fn list(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let mut all = serde_json::Map::new();
    for category in SettingCategory::all() {
        all.insert(
            category.as_str().to_string(),
            context
                .settings
                .category_payload(category)
                .await
                .map_err(AppError::Internal)?,
        );
    }
    Ok(ok(JsonValue::Object(all)))
}

pub async fn get_category(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let category = parse_category(&category)?;
    Ok(ok(context
        .settings
        .category_payload(category)
        .await
        .map_err(AppError::Internal)?))
}

pub async fn update_category(
    State(context): State<Arc<AppContext>>,
    Path(category): Path<String>,
    Json(payload): Json<JsonValue>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let category = parse_category(&category)?;
    let updated = context
        .update_settings(category, payload)
        .await
        .map_err(|error| AppError::bad_request(format!("{error:#}")))?;
    Ok(ok(updated))
}

/// The storage category payload; the static route shadows
/// `/api/settings/{category}` for this path.
pub async fn get_storage(
    State(context): State<Arc<AppContext>>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    Ok(ok(context
        .settings
        .category_payload(SettingCategory::Storage)
        .await
        .map_err(AppError::Internal)?))
}

/// Builds the candidate driver and probes it without saving anything.
pub async fn test_storage(
    Json(entry): Json<StorageEntryConfig>,
) -> AppResult<Json<ApiResponse<bool>>> {
    crate::storage::StorageManager::probe(&entry)
        .await
        .map_err(|error| AppError::bad_request(format!("storage unreachable: {error}")))?;
    Ok(ok(true))
}

/// Adds one storage driver to the storage category.
pub async fn add_storage(
    State(context): State<Arc<AppContext>>,
    Json(entry): Json<StorageEntryConfig>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    if !validate_storage_id(&entry.id) {
        return Err(AppError::bad_request(
            "storage id must be `local` or `<kind>:<accountId>`",
        ));
    }
    let mut storage = context
        .settings
        .snapshot()
        .map_err(AppError::Internal)?
        .storage
        .clone();
    if storage.drivers.iter().any(|driver| driver.id == entry.id) {
        return Err(AppError::conflict(format!(
            "storage id {} already exists",
            entry.id
        )));
    }
    storage.drivers.push(entry);
    apply_storage(context, storage).await
}

pub async fn update_storage(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(entry): Json<StorageEntryConfig>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    if entry.id != id {
        return Err(AppError::bad_request("storage id cannot be changed"));
    }
    let mut storage = context
        .settings
        .snapshot()
        .map_err(AppError::Internal)?
        .storage
        .clone();
    let slot = storage
        .drivers
        .iter_mut()
        .find(|driver| driver.id == id)
        .ok_or_else(|| AppError::not_found("storage driver not found"))?;
    *slot = entry;
    apply_storage(context, storage).await
}

/// Removal is refused while any image row still points at the driver; run a
/// migration off it first.
pub async fn remove_storage(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let referencing = context.images.count_on_storage(&id).await?;
    if referencing > 0 {
        return Err(AppError::conflict(format!(
            "{referencing} image(s) still live on storage {id}; migrate them off first"
        )));
    }

    let mut storage = context
        .settings
        .snapshot()
        .map_err(AppError::Internal)?
        .storage
        .clone();
    if storage.default_id == id || storage.thumbnail_id == id {
        return Err(AppError::conflict(
            "cannot remove the default or thumbnail storage; repoint them first",
        ));
    }
    let before = storage.drivers.len();
    storage.drivers.retain(|driver| driver.id != id);
    if storage.drivers.len() == before {
        return Err(AppError::not_found("storage driver not found"));
    }
    apply_storage(context, storage).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDefaultStorageRequest {
    pub id: String,
}

pub async fn set_default_storage(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<SetDefaultStorageRequest>,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let mut storage = context
        .settings
        .snapshot()
        .map_err(AppError::Internal)?
        .storage
        .clone();
    if !storage.drivers.iter().any(|driver| driver.id == request.id) {
        return Err(AppError::not_found("storage driver not found"));
    }
    storage.default_id = request.id;
    apply_storage(context, storage).await
}

async fn apply_storage(
    context: Arc<AppContext>,
    storage: crate::storage::StorageSettings,
) -> AppResult<Json<ApiResponse<JsonValue>>> {
    let updated = context
        .update_settings(SettingCategory::Storage, json!(storage))
        .await
        .map_err(|error| AppError::bad_request(format!("{error:#}")))?;
    Ok(ok(updated))
}
