use anyhow::anyhow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::dtos::image_dtos::{
    ConfirmUploadResponse, ImageDto, PrepareUploadRequest, PrepareUploadResponse, UploadTarget,
    UploadTokens,
};
use crate::entities::{Image, ImageExif, NewImage};
use crate::errors::{AppError, AppResult};
use crate::repositories::{ImageRepository, TagRepository};
use crate::services::ai::AiQueueManager;
use crate::services::exif_service::ExifService;
use crate::services::settings_service::SettingsService;
use crate::services::thumbnail_service::ThumbnailService;
use crate::services::upload_token::{UploadSlot, UploadTokenSigner};
use crate::storage::{BlobPath, ByteStream, StorageManager};
use crate::ws::{NotificationHub, message_types};

/// How long a prepared upload may sit before its token expires and the
/// entry is dropped.
const UPLOAD_TTL: ChronoDuration = ChronoDuration::hours(1);

#[derive(Debug, Clone)]
struct PreparedUpload {
    image_uuid: Uuid,
    hash: String,
    size: i64,
    mime: String,
    original_name: String,
    width: Option<i32>,
    height: Option<i32>,
    exif: ImageExif,
    storage_id: String,
    storage_path: String,
    thumbnail_path: Option<String>,
    thumbnail_width: Option<i32>,
    thumbnail_height: Option<i32>,
    expires_at: DateTime<Utc>,
}

enum PendingState {
    Staged(PreparedUpload),
    /// Kept (for one TTL) so a second confirm of the same upload id is a
    /// no-op returning the committed row.
    Completed(Image, DateTime<Utc>),
}

/// Hash-first ingestion: prepare → client upload → confirm, plus the
/// single-step multipart fallback. Clients do the hashing and thumbnail
/// work; the server verifies and commits.
pub struct IngestService {
    images: ImageRepository,
    tags: TagRepository,
    storage: Arc<StorageManager>,
    settings: Arc<SettingsService>,
    hub: Arc<NotificationHub>,
    ai: Arc<AiQueueManager>,
    exif: ExifService,
    thumbnails: ThumbnailService,
    pending: Mutex<HashMap<Uuid, PendingState>>,
}

impl IngestService {
    pub fn new(
        images: ImageRepository,
        tags: TagRepository,
        storage: Arc<StorageManager>,
        settings: Arc<SettingsService>,
        hub: Arc<NotificationHub>,
        ai: Arc<AiQueueManager>,
    ) -> Self {
        Self {
            images,
            tags,
            storage,
            settings,
            hub,
            ai,
            exif: ExifService::new(),
            thumbnails: ThumbnailService::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending_guard(&self) -> AppResult<MutexGuard<'_, HashMap<Uuid, PendingState>>> {
        self.pending
            .lock()
            .map_err(|_| AppError::Internal(anyhow!("Failed to lock pending upload table")))
    }

    pub async fn to_dto(&self, image: Image) -> ImageDto {
        let url = self.storage.public_url(&image);
        let thumbnail_url = self.storage.thumbnail_url(&image);
        let tags = self.tags.tags_of_image(image.id).await.ok();
        ImageDto {
            image,
            url,
            thumbnail_url,
            tags,
        }
    }

    /// Step 1: dedup check and token issuance. A known hash short-circuits
    /// with the existing image and no tokens.
    pub async fn prepare(&self, request: PrepareUploadRequest) -> AppResult<PrepareUploadResponse> {
        self.validate_size(request.size)?;
        if request.hash.len() != 64 || !request.hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::bad_request("hash must be 64 hex characters"));
        }
        let hash = request.hash.to_ascii_lowercase();

        if let Some(existing) = self.images.find_live_by_hash(&hash).await? {
            return Ok(PrepareUploadResponse {
                is_duplicate: true,
                existing_image: Some(self.to_dto(existing).await),
                upload_id: None,
                storage_path: None,
                thumbnail_path: None,
                upload_tokens: None,
            });
        }

        self.drop_expired()?;

        let now = Utc::now();
        let upload_id = Uuid::new_v4();
        let image_uuid = Uuid::new_v4();
        let storage_id = self.storage.default_id()?;
        let storage_path = BlobPath::original(now, image_uuid, &request.name);
        let wants_thumbnail =
            request.thumbnail_width.is_some() && request.thumbnail_height.is_some();
        let thumbnail_path = wants_thumbnail.then(|| BlobPath::thumbnail(now, image_uuid));
        let expires_at = now + UPLOAD_TTL;

        let original_target = self
            .upload_target(upload_id, UploadSlot::Original, &storage_id, &storage_path, expires_at)
            .await?;
        let thumbnail_target = match &thumbnail_path {
            Some(path) => {
                let thumbnail_id = self
                    .storage
                    .thumbnail_driver()
                    .map_err(AppError::from)?
                    .id()
                    .to_string();
                Some(
                    self.upload_target(upload_id, UploadSlot::Thumbnail, &thumbnail_id, path, expires_at)
                        .await?,
                )
            }
            None => None,
        };

        let prepared = PreparedUpload {
            image_uuid,
            hash,
            size: request.size,
            mime: request.mime.clone(),
            original_name: request.name.clone(),
            width: request.width,
            height: request.height,
            exif: request.exif.unwrap_or_default(),
            storage_id,
            storage_path: storage_path.clone(),
            thumbnail_path: thumbnail_path.clone(),
            thumbnail_width: request.thumbnail_width,
            thumbnail_height: request.thumbnail_height,
            expires_at,
        };
        self.pending_guard()?
            .insert(upload_id, PendingState::Staged(prepared));

        Ok(PrepareUploadResponse {
            is_duplicate: false,
            existing_image: None,
            upload_id: Some(upload_id),
            storage_path: Some(storage_path),
            thumbnail_path,
            upload_tokens: Some(UploadTokens {
                original: original_target,
                thumbnail: thumbnail_target,
            }),
        })
    }

    /// Presigned direct upload when the driver supports it, otherwise a
    /// signed internal endpoint scoped to this upload and slot.
    async fn upload_target(
        &self,
        upload_id: Uuid,
        slot: UploadSlot,
        storage_id: &str,
        path: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<UploadTarget> {
        let expires_unix = expires_at.timestamp();
        if let Ok(driver) = self.storage.driver_for(Some(storage_id)) {
            let remaining = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(60));
            if let Some(url) = driver.presign_put(path, remaining).await {
                return Ok(UploadTarget {
                    url,
                    method: "PUT".to_string(),
                    expires_at: expires_unix,
                });
            }
        }
        let token = self.signer()?.sign(upload_id, slot, expires_unix);
        Ok(UploadTarget {
            url: format!(
                "/api/images/upload-data/{upload_id}/{slot}?expires={expires_unix}&token={token}"
            ),
            method: "PUT".to_string(),
            expires_at: expires_unix,
        })
    }

    /// Step 2 (proxy path): verifies the token and streams the body to the
    /// exact path issued at prepare time.
    pub async fn receive_blob(
        &self,
        upload_id: Uuid,
        slot: UploadSlot,
        expires_unix: i64,
        token: &str,
        body: ByteStream,
    ) -> AppResult<u64> {
        if !self
            .signer()?
            .verify(upload_id, slot, expires_unix, token, Utc::now().timestamp())
        {
            return Err(AppError::unauthorized("invalid or expired upload token"));
        }

        let (storage_id, path, content_type) = {
            let pending = self.pending_guard()?;
            let Some(PendingState::Staged(prepared)) = pending.get(&upload_id) else {
                return Err(AppError::not_found("unknown upload id"));
            };
            match slot {
                UploadSlot::Original => (
                    prepared.storage_id.clone(),
                    prepared.storage_path.clone(),
                    prepared.mime.clone(),
                ),
                UploadSlot::Thumbnail => {
                    let path = prepared.thumbnail_path.clone().ok_or_else(|| {
                        AppError::bad_request("upload was prepared without a thumbnail")
                    })?;
                    let thumbnail_id = self
                        .storage
                        .thumbnail_driver()
                        .map_err(AppError::from)?
                        .id()
                        .to_string();
                    (thumbnail_id, path, "image/jpeg".to_string())
                }
            }
        };

        let written = self
            .storage
            .upload(Some(&storage_id), &path, body, &content_type)
            .await?;
        Ok(written)
    }

    /// Step 3: verify the staged blobs and commit the row. Idempotent per
    /// upload id; the hash unique constraint settles concurrent preparers.
    pub async fn confirm(&self, upload_id: Uuid) -> AppResult<ConfirmUploadResponse> {
        enum Lookup {
            Staged(PreparedUpload),
            AlreadyConfirmed(Image),
            Missing,
        }
        let lookup = {
            let pending = self.pending_guard()?;
            match pending.get(&upload_id) {
                Some(PendingState::Staged(prepared)) => Lookup::Staged(prepared.clone()),
                Some(PendingState::Completed(image, _)) => {
                    Lookup::AlreadyConfirmed(image.clone())
                }
                None => Lookup::Missing,
            }
        };
        let prepared = match lookup {
            Lookup::Staged(prepared) => prepared,
            Lookup::AlreadyConfirmed(image) => {
                return Ok(ConfirmUploadResponse {
                    is_duplicate: false,
                    image: self.to_dto(image).await,
                });
            }
            Lookup::Missing => return Err(AppError::not_found("unknown upload id")),
        };

        // The client must have finished both PUTs; size mismatches mean a
        // truncated or tampered upload.
        let driver = self.storage.driver_for(Some(&prepared.storage_id))?;
        let stat = driver.stat(&prepared.storage_path).await.map_err(|_| {
            AppError::bad_request("original blob has not been uploaded")
        })?;
        if stat.size != prepared.size as u64 {
            self.cleanup_staged(&prepared).await;
            self.forget(upload_id)?;
            return Err(AppError::bad_request(format!(
                "uploaded size {} does not match prepared size {}",
                stat.size, prepared.size
            )));
        }
        if let Some(thumbnail_path) = &prepared.thumbnail_path {
            let thumbnail_driver = self.storage.thumbnail_driver()?;
            if !thumbnail_driver.exists(thumbnail_path).await? {
                self.cleanup_staged(&prepared).await;
                self.forget(upload_id)?;
                return Err(AppError::bad_request(
                    "thumbnail was declared but not uploaded",
                ));
            }
        }

        let new_image = NewImage {
            uuid: prepared.image_uuid,
            hash: prepared.hash.clone(),
            original_name: prepared.original_name.clone(),
            mime: prepared.mime.clone(),
            bytes: prepared.size,
            width: prepared.width,
            height: prepared.height,
            exif: prepared.exif.clone(),
            storage_id: prepared.storage_id.clone(),
            storage_path: prepared.storage_path.clone(),
            thumbnail_path: prepared.thumbnail_path.clone(),
            thumbnail_width: prepared.thumbnail_width,
            thumbnail_height: prepared.thumbnail_height,
        };

        match self.commit_row(&new_image).await {
            Ok(image) => {
                // The row is committed; losing the idempotency entry only
                // costs a later confirm its no-op shortcut.
                if let Err(error) = self.remember_completed(upload_id, image.clone()) {
                    log::warn!("recording confirmed upload {upload_id} failed: {error}");
                }
                self.after_commit(&image).await;
                Ok(ConfirmUploadResponse {
                    is_duplicate: false,
                    image: self.to_dto(image).await,
                })
            }
            Err(CommitError::DuplicateHash) => {
                // Lost the prepare/confirm race; the winner's row is the
                // caller's result and our staged blobs are garbage.
                self.cleanup_staged(&prepared).await;
                self.forget(upload_id)?;
                let existing = self
                    .images
                    .find_live_by_hash(&prepared.hash)
                    .await?
                    .ok_or_else(|| {
                        AppError::conflict("duplicate hash but existing image vanished")
                    })?;
                Ok(ConfirmUploadResponse {
                    is_duplicate: true,
                    image: self.to_dto(existing).await,
                })
            }
            Err(CommitError::Other(error)) => {
                self.cleanup_staged(&prepared).await;
                if let Err(forget_error) = self.forget(upload_id) {
                    log::warn!("dropping failed upload {upload_id} failed: {forget_error}");
                }
                Err(error)
            }
        }
    }

    /// Single-step fallback: the server does the hashing, EXIF and
    /// thumbnail work the three-step protocol delegates to clients.
    pub async fn upload_direct(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> AppResult<ConfirmUploadResponse> {
        self.validate_size(bytes.len() as i64)?;

        let hash = hex::encode(Sha256::digest(&bytes));
        if let Some(existing) = self.images.find_live_by_hash(&hash).await? {
            return Ok(ConfirmUploadResponse {
                is_duplicate: true,
                image: self.to_dto(existing).await,
            });
        }

        let exif = self.exif.extract_from_bytes(&bytes);
        let now = Utc::now();
        let image_uuid = Uuid::new_v4();
        let storage_id = self.storage.default_id()?;
        let storage_path = BlobPath::original(now, image_uuid, file_name);

        let thumbnail = match self.thumbnails.generate(&bytes) {
            Ok(generated) => Some(generated),
            Err(error) => {
                log::warn!("thumbnail generation failed for {file_name}: {error:#}");
                None
            }
        };
        let (thumbnail_data, width, height) = match thumbnail {
            Some((thumb, source_width, source_height)) => {
                (Some(thumb), Some(source_width as i32), Some(source_height as i32))
            }
            None => (None, None, None),
        };

        let size = bytes.len() as i64;
        let body: ByteStream = Box::pin(stream::once(async move {
            Ok(bytes::Bytes::from(bytes))
        }));
        self.storage
            .upload(Some(&storage_id), &storage_path, body, content_type)
            .await?;

        let thumbnail_path = match &thumbnail_data {
            Some(thumb) => {
                let path = BlobPath::thumbnail(now, image_uuid);
                let thumbnail_driver = self.storage.thumbnail_driver()?;
                let thumb_bytes = bytes::Bytes::from(thumb.bytes.clone());
                let thumb_body: ByteStream =
                    Box::pin(stream::once(async move { Ok(thumb_bytes) }));
                thumbnail_driver
                    .upload(&path, thumb_body, "image/jpeg")
                    .await?;
                Some(path)
            }
            None => None,
        };

        let new_image = NewImage {
            uuid: image_uuid,
            hash,
            original_name: file_name.to_string(),
            mime: content_type.to_string(),
            bytes: size,
            width,
            height,
            exif,
            storage_id: storage_id.clone(),
            storage_path: storage_path.clone(),
            thumbnail_path: thumbnail_path.clone(),
            thumbnail_width: thumbnail_data.as_ref().map(|t| t.width as i32),
            thumbnail_height: thumbnail_data.as_ref().map(|t| t.height as i32),
        };

        match self.commit_row(&new_image).await {
            Ok(image) => {
                self.after_commit(&image).await;
                Ok(ConfirmUploadResponse {
                    is_duplicate: false,
                    image: self.to_dto(image).await,
                })
            }
            Err(CommitError::DuplicateHash) => {
                self.cleanup_paths(&storage_id, &storage_path, thumbnail_path.as_deref())
                    .await;
                let existing = self
                    .images
                    .find_live_by_hash(&new_image.hash)
                    .await?
                    .ok_or_else(|| {
                        AppError::conflict("duplicate hash but existing image vanished")
                    })?;
                Ok(ConfirmUploadResponse {
                    is_duplicate: true,
                    image: self.to_dto(existing).await,
                })
            }
            Err(CommitError::Other(error)) => {
                self.cleanup_paths(&storage_id, &storage_path, thumbnail_path.as_deref())
                    .await;
                Err(error)
            }
        }
    }

    async fn commit_row(&self, new_image: &NewImage) -> Result<Image, CommitError> {
        match self.images.insert(new_image).await {
            Ok(image) => Ok(image),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CommitError::DuplicateHash)
            }
            Err(error) => Err(CommitError::Other(error.into())),
        }
    }

    /// Post-commit fanout: AI work items and client notifications; the
    /// committed row is the result, so failures here only get logged.
    async fn after_commit(&self, image: &Image) {
        if let Err(error) = self.ai.enqueue_image(image.id).await {
            log::error!("enqueueing ai work for image {} failed: {error:#}", image.id);
        }
        if let Err(error) = self.hub.broadcast(
            message_types::IMAGES_CREATED,
            json!({ "id": image.id, "uuid": image.uuid }),
        ) {
            log::warn!("image-created broadcast failed: {error:#}");
        }
        if let Ok(count) = self.images.count_live().await {
            if let Err(error) = self
                .hub
                .broadcast(message_types::IMAGE_COUNT, json!({ "count": count }))
            {
                log::warn!("image-count broadcast failed: {error:#}");
            }
        }
    }

    fn validate_size(&self, size: i64) -> AppResult<()> {
        if size <= 0 {
            return Err(AppError::bad_request("upload size must be positive"));
        }
        let max = self
            .settings
            .snapshot()
            .map_err(AppError::Internal)?
            .general
            .max_upload_bytes;
        if size > max {
            return Err(AppError::bad_request(format!(
                "upload of {size} bytes exceeds the {max} byte limit"
            )));
        }
        Ok(())
    }

    fn signer(&self) -> AppResult<UploadTokenSigner> {
        let snapshot = self.settings.snapshot().map_err(AppError::Internal)?;
        Ok(UploadTokenSigner::new(snapshot.auth.jwt_secret.as_bytes()))
    }

    fn remember_completed(&self, upload_id: Uuid, image: Image) -> AppResult<()> {
        self.pending_guard()?
            .insert(upload_id, PendingState::Completed(image, Utc::now() + UPLOAD_TTL));
        Ok(())
    }

    fn forget(&self, upload_id: Uuid) -> AppResult<()> {
        self.pending_guard()?.remove(&upload_id);
        Ok(())
    }

    fn drop_expired(&self) -> AppResult<()> {
        let now = Utc::now();
        self.pending_guard()?.retain(|_, state| match state {
            PendingState::Staged(prepared) => prepared.expires_at > now,
            PendingState::Completed(_, keep_until) => *keep_until > now,
        });
        Ok(())
    }

    async fn cleanup_staged(&self, prepared: &PreparedUpload) {
        self.cleanup_paths(
            &prepared.storage_id,
            &prepared.storage_path,
            prepared.thumbnail_path.as_deref(),
        )
        .await;
    }

    /// Best-effort blob removal after a failed or lost commit; leftovers are
    /// tolerated and swept lazily.
    async fn cleanup_paths(
        &self,
        storage_id: &str,
        storage_path: &str,
        thumbnail_path: Option<&str>,
    ) {
        if let Err(error) = self.storage.delete(Some(storage_id), storage_path).await {
            log::warn!("staged blob cleanup failed for {storage_path}: {error}");
        }
        if let Some(thumbnail_path) = thumbnail_path {
            if let Ok(driver) = self.storage.thumbnail_driver() {
                if let Err(error) = driver.delete(thumbnail_path).await {
                    log::warn!("staged thumbnail cleanup failed for {thumbnail_path}: {error}");
                }
            }
        }
    }
}

enum CommitError {
    DuplicateHash,
    Other(AppError),
}
