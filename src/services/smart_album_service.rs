use anyhow::{Result, anyhow};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::dtos::album_dtos::SmartAlbumGenerateRequest;
use crate::entities::{Album, SmartAlbumTaskStatus};
use crate::errors::{AppError, AppResult};
use crate::repositories::{AlbumRepository, EmbeddingRepository, SmartAlbumTaskRepository};
use crate::services::ai::load_balancer::ModelLoadBalancer;
use crate::services::ai::model_client::{ClusterResult, ModelClient, ProgressUpdate};
use crate::ws::{NotificationHub, message_types};

const MIN_POINTS_TO_CLUSTER: usize = 5;

/// HDBSCAN smart-album generation over a streaming clustering RPC. Progress
/// frames are relayed to the hub under the submitted task id; clusters are
/// committed in one transaction only on a completed run.
pub struct SmartAlbumService {
    albums: AlbumRepository,
    embeddings: EmbeddingRepository,
    tasks: SmartAlbumTaskRepository,
    balancer: Arc<ModelLoadBalancer>,
    client: Arc<ModelClient>,
    hub: Arc<NotificationHub>,
    cancels: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl SmartAlbumService {
    pub fn new(
        albums: AlbumRepository,
        embeddings: EmbeddingRepository,
        tasks: SmartAlbumTaskRepository,
        balancer: Arc<ModelLoadBalancer>,
        client: Arc<ModelClient>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            albums,
            embeddings,
            tasks,
            balancer,
            client,
            hub,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    fn cancels_guard(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Arc<AtomicBool>>>> {
        self.cancels
            .lock()
            .map_err(|_| anyhow!("Failed to lock smart album task table"))
    }

    /// Asynchronous flow: returns the task id immediately, progress arrives
    /// over the hub.
    pub async fn generate(self: &Arc<Self>, request: SmartAlbumGenerateRequest) -> AppResult<Uuid> {
        let task_id = Uuid::new_v4();
        let params = json!({
            "hdbscan": request.hdbscan_params,
            "umap": request.umap_params,
        });
        self.tasks
            .create(task_id, &request.model_name, &params)
            .await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels_guard()
            .map_err(AppError::Internal)?
            .insert(task_id, cancel.clone());

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = service.run(task_id, &request, cancel).await;
            if let Err(error) = outcome {
                log::error!("smart album task {task_id} failed: {error:#}");
                let _ = service
                    .tasks
                    .finish_with(task_id, SmartAlbumTaskStatus::Failed, Some(&format!("{error:#}")))
                    .await;
                service.relay(task_id, ProgressUpdate {
                    status: ProgressUpdate::STATUS_FAILED.to_string(),
                    progress: 0.0,
                    message: None,
                    result: None,
                    error: Some(format!("{error:#}")),
                });
            }
            match service.cancels_guard() {
                Ok(mut cancels) => {
                    cancels.remove(&task_id);
                }
                Err(error) => {
                    log::error!("smart album task {task_id}: cancel cleanup failed: {error}");
                }
            }
        });

        Ok(task_id)
    }

    /// Synchronous legacy flow: waits for the run and returns the created
    /// albums.
    pub async fn generate_sync(
        self: &Arc<Self>,
        request: SmartAlbumGenerateRequest,
    ) -> AppResult<Vec<Album>> {
        let task_id = Uuid::new_v4();
        let params = json!({
            "hdbscan": request.hdbscan_params,
            "umap": request.umap_params,
        });
        self.tasks
            .create(task_id, &request.model_name, &params)
            .await?;
        let cancel = Arc::new(AtomicBool::new(false));
        match self.run(task_id, &request, cancel).await {
            Ok(albums) => Ok(albums),
            Err(error) => {
                let _ = self
                    .tasks
                    .finish_with(task_id, SmartAlbumTaskStatus::Failed, Some(&format!("{error:#}")))
                    .await;
                Err(AppError::Internal(error))
            }
        }
    }

    pub fn cancel(&self, task_id: Uuid) -> AppResult<()> {
        let cancels = self.cancels_guard().map_err(AppError::Internal)?;
        match cancels.get(&task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AppError::not_found("no running smart album task")),
        }
    }

    async fn run(
        &self,
        task_id: Uuid,
        request: &SmartAlbumGenerateRequest,
        cancel: Arc<AtomicBool>,
    ) -> Result<Vec<Album>> {
        let points = self
            .embeddings
            .points_for_model(&request.model_name)
            .await?;
        if points.len() < MIN_POINTS_TO_CLUSTER {
            return Err(anyhow!(
                "not enough embeddings for model {} ({} found, {MIN_POINTS_TO_CLUSTER} needed)",
                request.model_name,
                points.len()
            ));
        }
        let image_ids: Vec<i64> = points.iter().map(|point| point.image_id).collect();
        let vectors: Vec<Vec<f32>> = points.into_iter().map(|point| point.vector).collect();

        let providers = self.balancer.provider_order(&request.model_name)?;
        if providers.is_empty() {
            return Err(anyhow!(
                "no providers configured for model {}",
                request.model_name
            ));
        }

        let mut stream = None;
        let mut last_error = None;
        for provider in &providers {
            match self
                .client
                .cluster_stream(
                    provider,
                    vectors.clone(),
                    image_ids.clone(),
                    request.hdbscan_params.clone(),
                    request.umap_params.clone(),
                    task_id,
                )
                .await
            {
                Ok(opened) => {
                    stream = Some(opened);
                    break;
                }
                Err(error) => {
                    log::warn!(
                        "cluster stream via {} failed to open: {error}",
                        provider.name
                    );
                    last_error = Some(error);
                }
            }
        }
        let Some(stream) = stream else {
            return Err(anyhow!(
                "no provider accepted the clustering request: {}",
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ));
        };
        let mut stream = Box::pin(stream);

        let mut result: Option<ClusterResult> = None;
        while let Some(update) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                // Dropping the stream tears the RPC down; nothing was
                // committed.
                self.tasks
                    .finish_with(task_id, SmartAlbumTaskStatus::Cancelled, None)
                    .await?;
                self.relay(task_id, ProgressUpdate {
                    status: "cancelled".to_string(),
                    progress: 0.0,
                    message: Some("cancelled by user".to_string()),
                    result: None,
                    error: None,
                });
                return Ok(Vec::new());
            }
            let update = update?;
            let terminal = update.is_terminal();
            if update.status == ProgressUpdate::STATUS_FAILED {
                let message = update
                    .error
                    .clone()
                    .unwrap_or_else(|| "clustering failed".to_string());
                self.relay(task_id, update);
                return Err(anyhow!(message));
            }
            if terminal {
                result = update.result.clone();
            }
            self.relay(task_id, update);
            if terminal {
                break;
            }
        }

        let result = result.ok_or_else(|| anyhow!("stream ended without a result"))?;
        let albums = self.commit_clusters(task_id, request, &result).await?;
        if let Err(error) = self.hub.broadcast(
            message_types::ALBUMS_CHANGED,
            json!({ "created": albums.iter().map(|album| album.id).collect::<Vec<_>>() }),
        ) {
            log::warn!("albums-changed broadcast failed: {error:#}");
        }
        Ok(albums)
    }

    /// One transaction for all clusters; a failure commits nothing.
    async fn commit_clusters(
        &self,
        task_id: Uuid,
        request: &SmartAlbumGenerateRequest,
        result: &ClusterResult,
    ) -> Result<Vec<Album>> {
        let generated_at = Utc::now();
        let mut tx = self.albums.pool().begin().await?;
        let mut created = Vec::new();
        for (index, cluster) in result
            .clusters
            .iter()
            .filter(|cluster| !cluster.image_ids.is_empty())
            .enumerate()
        {
            let config = json!({
                "algorithm": "hdbscan",
                "modelName": request.model_name,
                "hdbscanParams": request.hdbscan_params,
                "umapParams": request.umap_params,
                "generatedAt": generated_at,
                "avgProbability": cluster.probability,
                "taskId": task_id,
            });
            let name = format!(
                "Smart album {} · {}",
                generated_at.format("%Y-%m-%d"),
                index + 1
            );
            let album = self
                .albums
                .create_smart_in_tx(&mut tx, &name, &config, &cluster.image_ids)
                .await?;
            created.push(album);
        }
        tx.commit().await?;

        let album_ids: Vec<i64> = created.iter().map(|album| album.id).collect();
        self.tasks
            .complete(task_id, &album_ids, &result.noise_image_ids)
            .await?;
        Ok(created)
    }

    /// Progress relay is telemetry; hub errors never abort the run.
    fn relay(&self, task_id: Uuid, update: ProgressUpdate) {
        if let Err(error) = self.hub.broadcast(
            message_types::SMART_ALBUM_PROGRESS,
            json!({
                "taskId": task_id,
                "status": update.status,
                "progress": update.progress,
                "message": update.message,
                "error": update.error,
            }),
        ) {
            log::warn!("smart album progress broadcast failed: {error:#}");
        }
    }
}
