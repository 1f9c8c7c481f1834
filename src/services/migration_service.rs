use anyhow::{Result, anyhow};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};

use crate::dtos::migration_dtos::{
    CreateMigrationRequest, MigrationPreviewDto, MigrationProgressDto,
};
use crate::entities::{MigrationFileRecord, MigrationStatus, MigrationTask, MigrationType};
use crate::errors::{AppError, AppResult};
use crate::repositories::{ImageRepository, MigrationRepository};
use crate::services::migration_progress::{ThroughputMeter, percent_done};
use crate::services::settings_service::SettingsService;
use crate::storage::{StorageError, StorageManager};
use crate::ws::{NotificationHub, message_types};

/// Concurrently running migration tasks.
const MAX_CONCURRENT_TASKS: usize = 2;
/// Ledger records drawn per batch.
const CHUNK_SIZE: i64 = 25;
/// Per-record transient retries.
const COPY_ATTEMPTS: u32 = 3;
const COPY_BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Progress telemetry cadence: every N records or T elapsed.
const BROADCAST_EVERY_RECORDS: u64 = 10;
const BROADCAST_EVERY: Duration = Duration::from_secs(2);
/// Planning rate for previews when no transfer has been observed yet.
const PREVIEW_BYTES_PER_SEC: f64 = 20.0 * 1024.0 * 1024.0;

struct TaskControl {
    pause: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

/// Online migration of blobs between drivers: resumable via the per-file
/// ledger, pausable, observable per file, and safe to re-run after a crash.
pub struct MigrationService {
    migrations: MigrationRepository,
    images: ImageRepository,
    storage: Arc<StorageManager>,
    settings: Arc<SettingsService>,
    hub: Arc<NotificationHub>,
    semaphore: Arc<Semaphore>,
    controls: Mutex<HashMap<i64, TaskControl>>,
}

impl MigrationService {
    pub fn new(
        migrations: MigrationRepository,
        images: ImageRepository,
        storage: Arc<StorageManager>,
        settings: Arc<SettingsService>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            migrations,
            images,
            storage,
            settings,
            hub,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_TASKS)),
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Cost estimate without any mutation.
    pub async fn preview(&self, request: &CreateMigrationRequest) -> AppResult<MigrationPreviewDto> {
        self.validate_request(request)?;
        let candidates = self
            .migrations
            .candidates(
                request.migration_type,
                &request.source_storage_id,
                &request.filter,
            )
            .await?;
        let files_count = candidates.len() as i64;
        let total_bytes: i64 = candidates.iter().map(|candidate| candidate.bytes).sum();
        Ok(MigrationPreviewDto {
            files_count,
            total_bytes,
            estimated_seconds: (total_bytes as f64 / PREVIEW_BYTES_PER_SEC).ceil() as i64,
        })
    }

    /// Creates the task with its full pending ledger and spawns the worker.
    pub async fn start(self: &Arc<Self>, request: CreateMigrationRequest) -> AppResult<MigrationTask> {
        self.validate_request(&request)?;
        let filter_json = serde_json::to_value(&request.filter)
            .map_err(|error| AppError::Internal(error.into()))?;
        let task = self
            .migrations
            .create_task(
                request.migration_type,
                &request.source_storage_id,
                &request.target_storage_id,
                &filter_json,
                request.delete_source_after,
            )
            .await?;

        let candidates = self
            .migrations
            .candidates(
                request.migration_type,
                &request.source_storage_id,
                &request.filter,
            )
            .await?;
        let image_ids: Vec<i64> = candidates.iter().map(|candidate| candidate.id).collect();
        self.migrations.insert_records(task.id, &image_ids).await?;

        self.spawn_worker(task.id).map_err(AppError::Internal)?;
        Ok(self
            .migrations
            .get(task.id)
            .await?
            .unwrap_or(task))
    }

    /// Re-attaches workers to tasks that were running when the process died.
    pub async fn resume_interrupted(self: &Arc<Self>) -> Result<()> {
        for task in self.migrations.list_active().await? {
            if task.status() == Some(MigrationStatus::Running)
                || task.status() == Some(MigrationStatus::Pending)
            {
                log::info!("resuming interrupted migration task {}", task.id);
                self.spawn_worker(task.id)?;
            }
        }
        Ok(())
    }

    pub async fn pause(&self, task_id: i64) -> AppResult<()> {
        let task = self.require_task(task_id).await?;
        match task.status() {
            Some(MigrationStatus::Running) | Some(MigrationStatus::Pending) => {
                if let Some(control) = self.control_of(task_id)? {
                    control.store(true, Ordering::SeqCst);
                } else {
                    self.migrations
                        .set_status(task_id, MigrationStatus::Paused)
                        .await?;
                }
                Ok(())
            }
            Some(MigrationStatus::Paused) => Ok(()),
            _ => Err(AppError::conflict("task is not pausable")),
        }
    }

    pub async fn resume(self: &Arc<Self>, task_id: i64) -> AppResult<()> {
        let task = self.require_task(task_id).await?;
        match task.status() {
            Some(MigrationStatus::Paused) | Some(MigrationStatus::Pending) => {
                self.spawn_worker(task_id).map_err(AppError::Internal)?;
                Ok(())
            }
            Some(MigrationStatus::Running) => Ok(()),
            _ => Err(AppError::conflict("task is not resumable")),
        }
    }

    /// Accepted from any non-terminal state.
    pub async fn cancel(&self, task_id: i64) -> AppResult<()> {
        let task = self.require_task(task_id).await?;
        match task.status() {
            Some(status) if status.is_terminal() => {
                Err(AppError::conflict("task already finished"))
            }
            _ => {
                if let Some(control) = self.cancel_flag_of(task_id)? {
                    control.store(true, Ordering::SeqCst);
                } else {
                    self.migrations
                        .set_status(task_id, MigrationStatus::Cancelled)
                        .await?;
                    self.broadcast_progress(task_id).await;
                }
                Ok(())
            }
        }
    }

    /// Moves every failed record back to pending and restarts the worker.
    pub async fn retry(self: &Arc<Self>, task_id: i64) -> AppResult<u64> {
        let _ = self.require_task(task_id).await?;
        let moved = self.migrations.retry_failed(task_id).await?;
        if moved > 0 {
            self.spawn_worker(task_id).map_err(AppError::Internal)?;
        }
        Ok(moved)
    }

    /// Accepts remaining failures; the ledger keeps them for audit and the
    /// task completes.
    pub async fn dismiss(&self, task_id: i64) -> AppResult<()> {
        let task = self.require_task(task_id).await?;
        let pending = self.migrations.pending_count(task_id).await?;
        if pending > 0 {
            return Err(AppError::conflict(
                "task still has pending records; pause or cancel instead",
            ));
        }
        if task.status() != Some(MigrationStatus::Completed) {
            self.migrations
                .set_status(task_id, MigrationStatus::Completed)
                .await?;
            self.broadcast_progress(task_id).await;
        }
        Ok(())
    }

    pub async fn list_active(&self) -> AppResult<Vec<MigrationTask>> {
        Ok(self.migrations.list_active().await?)
    }

    pub async fn get(&self, task_id: i64) -> AppResult<MigrationTask> {
        self.require_task(task_id).await
    }

    pub async fn failed_records(&self, task_id: i64) -> AppResult<Vec<MigrationFileRecord>> {
        let _ = self.require_task(task_id).await?;
        Ok(self.migrations.failed_records(task_id).await?)
    }

    fn validate_request(&self, request: &CreateMigrationRequest) -> AppResult<()> {
        if request.source_storage_id == request.target_storage_id {
            return Err(AppError::bad_request(
                "source and target storage must differ",
            ));
        }
        self.storage
            .driver_for(Some(&request.source_storage_id))
            .map_err(|_| AppError::bad_request("unknown source storage id"))?;
        self.storage
            .driver_for(Some(&request.target_storage_id))
            .map_err(|_| AppError::bad_request("unknown target storage id"))?;
        Ok(())
    }

    async fn require_task(&self, task_id: i64) -> AppResult<MigrationTask> {
        self.migrations
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("migration task not found"))
    }

    fn controls_guard(&self) -> Result<MutexGuard<'_, HashMap<i64, TaskControl>>> {
        self.controls
            .lock()
            .map_err(|_| anyhow!("Failed to lock migration control table"))
    }

    fn control_of(&self, task_id: i64) -> AppResult<Option<Arc<AtomicBool>>> {
        Ok(self
            .controls_guard()
            .map_err(AppError::Internal)?
            .get(&task_id)
            .map(|control| control.pause.clone()))
    }

    fn cancel_flag_of(&self, task_id: i64) -> AppResult<Option<Arc<AtomicBool>>> {
        Ok(self
            .controls_guard()
            .map_err(AppError::Internal)?
            .get(&task_id)
            .map(|control| control.cancel.clone()))
    }

    fn spawn_worker(self: &Arc<Self>, task_id: i64) -> Result<()> {
        let pause = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut controls = self.controls_guard()?;
            if controls.contains_key(&task_id) {
                // A worker is already attached in this process.
                return Ok(());
            }
            controls.insert(
                task_id,
                TaskControl {
                    pause: pause.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_task(task_id, pause, cancel).await;
            match service.controls_guard() {
                Ok(mut controls) => {
                    controls.remove(&task_id);
                }
                Err(error) => {
                    log::error!("migration task {task_id}: control cleanup failed: {error}");
                }
            }
        });
        Ok(())
    }

    async fn run_task(&self, task_id: i64, pause: Arc<AtomicBool>, cancel: Arc<AtomicBool>) {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        // Only one holder may progress a task, even across processes.
        let _lock = match self.migrations.try_lock(task_id).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                log::warn!("migration task {task_id}: already locked elsewhere");
                return;
            }
            Err(error) => {
                log::error!("migration task {task_id}: lock acquisition failed: {error}");
                return;
            }
        };

        let Ok(Some(task)) = self.migrations.get(task_id).await else {
            return;
        };
        if task.status().map(|s| s.is_terminal()).unwrap_or(true) {
            return;
        }
        if self
            .migrations
            .set_status(task_id, MigrationStatus::Running)
            .await
            .is_err()
        {
            return;
        }
        self.broadcast_progress(task_id).await;
        log::info!(
            "migration task {task_id} running: {} -> {}",
            task.source_storage_id,
            task.target_storage_id
        );

        let mut meter = ThroughputMeter::new();
        let mut moved_bytes_total = 0u64;
        let mut moved_files_total = 0u64;
        let mut records_since_broadcast = 0u64;
        let mut last_broadcast = Instant::now();

        'outer: loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = self
                    .migrations
                    .set_status(task_id, MigrationStatus::Cancelled)
                    .await;
                break;
            }
            if pause.load(Ordering::SeqCst) {
                let _ = self
                    .migrations
                    .set_status(task_id, MigrationStatus::Paused)
                    .await;
                break;
            }

            let batch = match self.migrations.next_pending(task_id, CHUNK_SIZE).await {
                Ok(batch) => batch,
                Err(error) => {
                    log::error!("migration task {task_id}: ledger read failed: {error}");
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            if batch.is_empty() {
                self.finalize(&task).await;
                break;
            }

            for record in batch {
                if cancel.load(Ordering::SeqCst) || pause.load(Ordering::SeqCst) {
                    continue 'outer;
                }

                let started = Instant::now();
                match self.copy_record(&task, &record).await {
                    Ok(bytes) => {
                        if let Err(error) =
                            self.migrations.record_success(&task, &record).await
                        {
                            log::error!(
                                "migration task {task_id}: committing record {} failed: {error}",
                                record.id
                            );
                            continue;
                        }
                        meter.record(bytes, started.elapsed().as_secs_f64());
                        moved_bytes_total += bytes;
                        moved_files_total += 1;
                        if task.delete_source_after
                            && task.migration_type() == Some(MigrationType::Original)
                        {
                            self.delete_source_blob(&task, record.image_id).await;
                        }
                    }
                    Err(error) => {
                        log::warn!(
                            "migration task {task_id}: record {} failed: {error}",
                            record.id
                        );
                        if let Err(db_error) = self
                            .migrations
                            .record_failed(task_id, record.id, &error.to_string())
                            .await
                        {
                            log::error!(
                                "migration task {task_id}: marking record {} failed: {db_error}",
                                record.id
                            );
                        }
                    }
                }

                records_since_broadcast += 1;
                if records_since_broadcast >= BROADCAST_EVERY_RECORDS
                    || last_broadcast.elapsed() >= BROADCAST_EVERY
                {
                    self.broadcast_progress_with_meter(
                        task_id,
                        &meter,
                        moved_bytes_total,
                        moved_files_total,
                    )
                    .await;
                    records_since_broadcast = 0;
                    last_broadcast = Instant::now();
                }
            }
        }

        self.broadcast_progress_with_meter(task_id, &meter, moved_bytes_total, moved_files_total)
            .await;
        log::info!("migration task {task_id} worker exited");
    }

    /// Copies one ledger record source → target with transient retries.
    /// Returns the byte count moved; records with nothing to move succeed
    /// with zero.
    async fn copy_record(
        &self,
        task: &MigrationTask,
        record: &MigrationFileRecord,
    ) -> Result<u64, StorageError> {
        let image = self
            .images
            .get(record.image_id)
            .await
            .map_err(|error| StorageError::Transient(error.to_string()))?;
        let Some(image) = image else {
            return Ok(0);
        };

        let path = match task.migration_type() {
            Some(MigrationType::Original) => {
                if image.storage_id != task.source_storage_id {
                    // Already repointed by an earlier run.
                    return Ok(0);
                }
                image.storage_path.clone()
            }
            Some(MigrationType::Thumbnail) => match &image.thumbnail_path {
                Some(path) => path.clone(),
                None => return Ok(0),
            },
            None => {
                return Err(StorageError::Permanent(format!(
                    "task {} has an unknown migration type",
                    task.id
                )));
            }
        };

        let mut last_error = StorageError::Permanent("copy was never attempted".to_string());
        for attempt in 0..COPY_ATTEMPTS {
            match self.copy_once(task, &path, &image.mime).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) if error.is_transient() && attempt + 1 < COPY_ATTEMPTS => {
                    let backoff = COPY_BACKOFF_BASE * 2u32.pow(attempt)
                        + Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    log::debug!(
                        "migration task {}: transient copy error, retrying in {backoff:?}: {error}",
                        task.id
                    );
                    sleep(backoff).await;
                    last_error = error;
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error)
    }

    /// One streamed copy attempt; the target path preserves the source's
    /// relative structure.
    async fn copy_once(
        &self,
        task: &MigrationTask,
        path: &str,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let (stream, _size) = self
            .storage
            .download(Some(&task.source_storage_id), path)
            .await?;
        self.storage
            .upload(Some(&task.target_storage_id), path, stream, content_type)
            .await
    }

    async fn delete_source_blob(&self, task: &MigrationTask, image_id: i64) {
        let Ok(Some(image)) = self.images.get(image_id).await else {
            return;
        };
        // The row already points at the target; the stale source copy is
        // best-effort garbage.
        if let Err(error) = self
            .storage
            .delete(Some(&task.source_storage_id), &image.storage_path)
            .await
        {
            log::warn!(
                "migration task {}: source blob cleanup failed for {}: {error}",
                task.id,
                image.storage_path
            );
        }
    }

    /// All records drained: the task completes even when some failed.
    /// Thumbnail migrations additionally repoint the thumbnail driver and
    /// only then drop the source copies.
    async fn finalize(&self, task: &MigrationTask) {
        let _ = self
            .migrations
            .set_status(task.id, MigrationStatus::Completed)
            .await;

        if task.migration_type() == Some(MigrationType::Thumbnail) {
            if let Err(error) = self.switch_thumbnail_driver(task).await {
                log::error!(
                    "migration task {}: thumbnail driver switch failed: {error:#}",
                    task.id
                );
            }
        }
        self.broadcast_progress(task.id).await;
        log::info!("migration task {} completed", task.id);
    }

    async fn switch_thumbnail_driver(&self, task: &MigrationTask) -> Result<()> {
        let refreshed = self.migrations.get(task.id).await?.unwrap_or(task.clone());
        if refreshed.failed > 0 {
            log::warn!(
                "migration task {}: {} thumbnail(s) failed to copy; keeping the old thumbnail driver",
                task.id,
                refreshed.failed
            );
            return Ok(());
        }

        let mut storage_settings = self.settings.snapshot()?.storage.clone();
        if storage_settings.thumbnail_id != task.source_storage_id {
            return Ok(());
        }
        storage_settings.thumbnail_id = task.target_storage_id.clone();
        let snapshot = self
            .settings
            .update_category(
                crate::entities::SettingCategory::Storage,
                serde_json::to_value(&storage_settings)?,
            )
            .await?;
        self.storage.rebuild(&snapshot.storage)?;

        if task.delete_source_after {
            let images = self
                .migrations
                .candidates(
                    MigrationType::Thumbnail,
                    &task.source_storage_id,
                    &refreshed.parsed_filter(),
                )
                .await?;
            for candidate in images {
                if let Ok(Some(image)) = self.images.get(candidate.id).await {
                    if let Some(thumbnail_path) = &image.thumbnail_path {
                        if let Err(error) = self
                            .storage
                            .delete(Some(&task.source_storage_id), thumbnail_path)
                            .await
                        {
                            log::warn!(
                                "migration task {}: old thumbnail cleanup failed for {thumbnail_path}: {error}",
                                task.id
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn broadcast_progress(&self, task_id: i64) {
        self.broadcast_progress_with_meter(task_id, &ThroughputMeter::new(), 0, 0)
            .await;
    }

    async fn broadcast_progress_with_meter(
        &self,
        task_id: i64,
        meter: &ThroughputMeter,
        moved_bytes: u64,
        moved_files: u64,
    ) {
        let Ok(Some(task)) = self.migrations.get(task_id).await else {
            return;
        };
        let remaining_files = (task.total - task.processed).max(0);
        let avg_file_bytes = if moved_files > 0 {
            moved_bytes as f64 / moved_files as f64
        } else {
            0.0
        };
        let progress = MigrationProgressDto {
            task_id: task.id,
            status: task.status.clone(),
            processed: task.processed,
            failed: task.failed,
            total: task.total,
            percent: percent_done(task.processed, task.total),
            bytes_per_sec: meter.bytes_per_sec(),
            remaining_seconds: meter.remaining_seconds(remaining_files, avg_file_bytes),
        };
        if let Ok(data) = serde_json::to_value(&progress) {
            if let Err(error) = self
                .hub
                .broadcast_debounced(message_types::MIGRATION_PROGRESS, data)
            {
                log::warn!("migration progress broadcast failed: {error:#}");
            }
        }
    }
}
