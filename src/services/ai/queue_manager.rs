use anyhow::{Result, anyhow};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::entities::{AiQueue, AiQueueStatus, AiTaskItem, AiTaskType};
use crate::errors::{AppError, AppResult};
use crate::repositories::AiQueueRepository;
use crate::services::ai::load_balancer::ModelLoadBalancer;
use crate::services::ai::model_client::ModelClient;
use crate::services::ai::processors::{ITEM_TYPE_IMAGE, ITEM_TYPE_TAG, ProcessError, TaskProcessor};
use crate::services::settings_service::{AiProviderConfig, AiSettings, SettingsService};
use crate::ws::{NotificationHub, message_types};

const BATCH_SIZE: i64 = 8;
/// Transient retries per provider before failing over to the next one.
const ATTEMPTS_PER_PROVIDER: u32 = 2;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Idle workers re-poll at this cadence even without a wake signal.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

struct WorkerHandle {
    queue_id: i64,
    notify: Arc<Notify>,
    active: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owns one worker loop per queue key and the retry/ignore controls.
/// Dispatch goes through the model load balancer; every state change is
/// published as an `ai_queue_status` snapshot.
pub struct AiQueueManager {
    queues: AiQueueRepository,
    hub: Arc<NotificationHub>,
    settings: Arc<SettingsService>,
    balancer: Arc<ModelLoadBalancer>,
    client: Arc<ModelClient>,
    processors: HashMap<AiTaskType, Arc<dyn TaskProcessor>>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    shutdown: watch::Sender<bool>,
}

impl AiQueueManager {
    pub fn new(
        queues: AiQueueRepository,
        hub: Arc<NotificationHub>,
        settings: Arc<SettingsService>,
        balancer: Arc<ModelLoadBalancer>,
        client: Arc<ModelClient>,
        processors: Vec<Arc<dyn TaskProcessor>>,
    ) -> Self {
        let processors = processors
            .into_iter()
            .map(|processor| (processor.task_type(), processor))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            queues,
            hub,
            settings,
            balancer,
            client,
            processors,
            workers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    fn workers_guard(&self) -> Result<MutexGuard<'_, HashMap<String, WorkerHandle>>> {
        self.workers
            .lock()
            .map_err(|_| anyhow!("Failed to lock worker table"))
    }

    /// Builds the routing table and one worker per queue derived from the
    /// current AI settings, then backfills fresh queues.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let ai = self.settings.snapshot()?.ai.clone();
        self.apply_settings(&ai).await
    }

    /// Reconciles workers against a (possibly changed) AI settings category:
    /// new queues get workers and a backfill, removed queues wind down.
    pub async fn apply_settings(self: &Arc<Self>, ai: &AiSettings) -> Result<()> {
        self.balancer.rebuild(ai)?;

        let mut desired: Vec<(AiTaskType, Option<String>)> = Vec::new();
        if ai.aesthetic_enabled && !ai.providers.is_empty() {
            desired.push((AiTaskType::AestheticScoring, None));
        }
        for model in ai.model_names() {
            if ai.image_embedding_enabled {
                desired.push((AiTaskType::ImageEmbedding, Some(model.clone())));
            }
            if ai.tag_embedding_enabled {
                desired.push((AiTaskType::TagEmbedding, Some(model.clone())));
            }
        }

        let desired_keys: Vec<String> = desired
            .iter()
            .map(|(task_type, model)| task_type.queue_key(model.as_deref()))
            .collect();

        // Wind down queues no longer in the settings.
        {
            let mut workers = self.workers_guard()?;
            let stale: Vec<String> = workers
                .keys()
                .filter(|key| !desired_keys.contains(*key))
                .cloned()
                .collect();
            for key in stale {
                if let Some(handle) = workers.remove(&key) {
                    handle.active.store(false, Ordering::SeqCst);
                    handle.notify.notify_one();
                    log::info!("ai queue {key} stopping: removed from settings");
                }
            }
        }

        for (task_type, model) in desired {
            self.ensure_worker(task_type, model.as_deref()).await?;
        }
        self.broadcast_status().await;
        Ok(())
    }

    async fn ensure_worker(
        self: &Arc<Self>,
        task_type: AiTaskType,
        model_name: Option<&str>,
    ) -> Result<()> {
        let queue = self.queues.get_or_create(task_type, model_name).await?;
        let key = queue.queue_key.clone();
        if self.workers_guard()?.contains_key(&key) {
            return Ok(());
        }

        let Some(processor) = self.processors.get(&task_type).cloned() else {
            log::warn!("no processor registered for {task_type}");
            return Ok(());
        };

        // Backfill before the worker starts so the first poll sees work.
        let enqueued = processor.enqueue_all(queue.id, model_name).await?;
        if enqueued > 0 {
            log::info!("ai queue {key}: backfilled {enqueued} item(s)");
        }

        let notify = Arc::new(Notify::new());
        let active = Arc::new(AtomicBool::new(true));
        let manager = Arc::clone(self);
        let worker_queue = queue.clone();
        let worker_notify = notify.clone();
        let worker_active = active.clone();
        let join = tokio::spawn(async move {
            manager
                .worker_loop(worker_queue, processor, worker_notify, worker_active)
                .await;
        });

        self.workers_guard()?.insert(
            key,
            WorkerHandle {
                queue_id: queue.id,
                notify,
                active,
                join,
            },
        );
        Ok(())
    }

    async fn worker_loop(
        self: Arc<Self>,
        queue: AiQueue,
        processor: Arc<dyn TaskProcessor>,
        notify: Arc<Notify>,
        active: Arc<AtomicBool>,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        let model_name = queue.model_name.clone();
        log::info!("ai queue {} worker started", queue.queue_key);

        loop {
            if *shutdown.borrow() || !active.load(Ordering::SeqCst) {
                break;
            }

            let batch = match self.queues.take_pending(queue.id, BATCH_SIZE).await {
                Ok(batch) => batch,
                Err(error) => {
                    log::error!("ai queue {}: poll failed: {error}", queue.queue_key);
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if batch.is_empty() {
                let _ = self.queues.set_status(queue.id, AiQueueStatus::Idle).await;
                self.broadcast_status_now().await;
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = shutdown.changed() => {}
                    _ = sleep(IDLE_POLL_INTERVAL) => {}
                }
                continue;
            }

            let _ = self
                .queues
                .set_status(queue.id, AiQueueStatus::Processing)
                .await;
            self.broadcast_status_now().await;

            for item in batch {
                if *shutdown.borrow() || !active.load(Ordering::SeqCst) {
                    // In-flight items stay pending for the next start.
                    return;
                }
                match self
                    .process_with_failover(&processor, &item, model_name.as_deref())
                    .await
                {
                    Ok(()) => {
                        if let Err(error) = self.queues.complete(&item).await {
                            log::error!(
                                "ai queue {}: completing item {} failed: {error}",
                                queue.queue_key,
                                item.id
                            );
                        }
                    }
                    Err(error) => {
                        log::warn!(
                            "ai queue {}: item {} failed: {error}",
                            queue.queue_key,
                            item.id
                        );
                        if let Err(db_error) =
                            self.queues.fail(&item, &error.to_string()).await
                        {
                            log::error!(
                                "ai queue {}: marking item {} failed: {db_error}",
                                queue.queue_key,
                                item.id
                            );
                        }
                    }
                }
                self.broadcast_status().await;
            }
        }

        let _ = self.queues.set_status(queue.id, AiQueueStatus::Idle).await;
        log::info!("ai queue {} worker stopped", queue.queue_key);
    }

    /// Tries providers in round-robin order; within each provider, transient
    /// errors are retried with backoff. Only after all providers are
    /// exhausted does the item fail.
    async fn process_with_failover(
        &self,
        processor: &Arc<dyn TaskProcessor>,
        item: &AiTaskItem,
        model_name: Option<&str>,
    ) -> Result<(), ProcessError> {
        let providers: Vec<AiProviderConfig> = match model_name {
            Some(model) => self.balancer.provider_order(model),
            None => self.balancer.any_provider_order(),
        }
        .map_err(|error| ProcessError::Permanent(error.to_string()))?;
        if providers.is_empty() {
            return Err(ProcessError::Permanent(
                "no providers configured for this queue".to_string(),
            ));
        }

        let mut last_error =
            ProcessError::Permanent("no provider attempted the item".to_string());
        for provider in &providers {
            for attempt in 0..ATTEMPTS_PER_PROVIDER {
                match processor.process(item, provider, model_name).await {
                    Ok(()) => return Ok(()),
                    Err(error) if error.is_transient() && attempt + 1 < ATTEMPTS_PER_PROVIDER => {
                        let backoff = RETRY_BACKOFF_BASE * 2u32.pow(attempt)
                            + Duration::from_millis(rand::thread_rng().gen_range(0..250));
                        log::debug!(
                            "ai item {} on {}: transient, retrying in {backoff:?}: {error}",
                            item.id,
                            provider.name
                        );
                        sleep(backoff).await;
                    }
                    Err(error) => {
                        log::debug!(
                            "ai item {} failing over from {}: {error}",
                            item.id,
                            provider.name
                        );
                        last_error = error;
                        break;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Fans out one pending item per enabled queue for a new image.
    pub async fn enqueue_image(&self, image_id: i64) -> Result<()> {
        let ai = self.settings.snapshot()?.ai.clone();
        if ai.image_embedding_enabled {
            for model in ai.model_names() {
                let queue = self
                    .queues
                    .get_or_create(AiTaskType::ImageEmbedding, Some(&model))
                    .await?;
                self.queues
                    .enqueue(queue.id, image_id, ITEM_TYPE_IMAGE)
                    .await?;
                self.wake(&queue.queue_key)?;
            }
        }
        if ai.aesthetic_enabled && !ai.providers.is_empty() {
            let queue = self
                .queues
                .get_or_create(AiTaskType::AestheticScoring, None)
                .await?;
            self.queues
                .enqueue(queue.id, image_id, ITEM_TYPE_IMAGE)
                .await?;
            self.wake(&queue.queue_key)?;
        }
        self.broadcast_status().await;
        Ok(())
    }

    /// Enqueues a tag for embedding under every model, e.g. after a rename.
    pub async fn enqueue_tag(&self, tag_id: i64) -> Result<()> {
        let ai = self.settings.snapshot()?.ai.clone();
        if !ai.tag_embedding_enabled {
            return Ok(());
        }
        for model in ai.model_names() {
            let queue = self
                .queues
                .get_or_create(AiTaskType::TagEmbedding, Some(&model))
                .await?;
            self.queues.enqueue(queue.id, tag_id, ITEM_TYPE_TAG).await?;
            self.wake(&queue.queue_key)?;
        }
        self.broadcast_status().await;
        Ok(())
    }

    pub async fn retry_item(&self, item_id: i64) -> AppResult<()> {
        let queue_id = self
            .queues
            .retry_item(item_id)
            .await?
            .ok_or_else(|| AppError::not_found("failed task item not found"))?;
        self.wake_by_id(queue_id).map_err(AppError::Internal)?;
        self.broadcast_status().await;
        Ok(())
    }

    pub async fn ignore_item(&self, item_id: i64) -> AppResult<()> {
        self.queues
            .ignore_item(item_id)
            .await?
            .ok_or_else(|| AppError::not_found("failed task item not found"))?;
        self.broadcast_status().await;
        Ok(())
    }

    pub async fn retry_queue(&self, queue_id: i64) -> AppResult<u64> {
        let moved = self.queues.retry_all(queue_id).await?;
        self.wake_by_id(queue_id).map_err(AppError::Internal)?;
        self.broadcast_status().await;
        Ok(moved)
    }

    pub async fn clear_queue_failures(&self, queue_id: i64) -> AppResult<u64> {
        let removed = self.queues.clear_failed(queue_id).await?;
        self.broadcast_status().await;
        Ok(removed)
    }

    pub async fn queue_snapshot(&self) -> Result<Vec<AiQueue>> {
        Ok(self.queues.list().await?)
    }

    pub async fn test_connection(&self, provider: &AiProviderConfig) -> AppResult<()> {
        self.client
            .health(provider)
            .await
            .map_err(|error| AppError::bad_request(format!("provider unreachable: {error}")))
    }

    fn wake(&self, queue_key: &str) -> Result<()> {
        if let Some(handle) = self.workers_guard()?.get(queue_key) {
            handle.notify.notify_one();
        }
        Ok(())
    }

    fn wake_by_id(&self, queue_id: i64) -> Result<()> {
        for handle in self.workers_guard()?.values() {
            if handle.queue_id == queue_id {
                handle.notify.notify_one();
            }
        }
        Ok(())
    }

    /// Status fanout is telemetry; hub failures are logged, never returned.
    async fn broadcast_status(&self) {
        if let Ok(queues) = self.queues.list().await {
            if let Ok(data) = serde_json::to_value(queues) {
                if let Err(error) = self
                    .hub
                    .broadcast_debounced(message_types::AI_QUEUE_STATUS, data)
                {
                    log::warn!("queue status broadcast failed: {error:#}");
                }
            }
        }
    }

    /// Undebounced variant for idle/processing transitions so the final
    /// state of a drain is never lost to the rate limit.
    async fn broadcast_status_now(&self) {
        if let Ok(queues) = self.queues.list().await {
            if let Ok(data) = serde_json::to_value(queues) {
                if let Err(error) = self.hub.broadcast(message_types::AI_QUEUE_STATUS, data) {
                    log::warn!("queue status broadcast failed: {error:#}");
                }
            }
        }
    }

    /// Signals every worker and waits for them to park. In-flight items
    /// remain pending; processors are idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<WorkerHandle> = match self.workers_guard() {
            Ok(mut workers) => workers.drain().map(|(_, handle)| handle).collect(),
            Err(error) => {
                log::error!("worker table unavailable during shutdown: {error}");
                return;
            }
        };
        for handle in &handles {
            handle.notify.notify_one();
        }
        for handle in handles {
            let _ = handle.join.await;
        }
    }
}
