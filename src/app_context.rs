use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;

use crate::entities::SettingCategory;
use crate::repositories::{
    AiQueueRepository, AlbumRepository, EmbeddingRepository, ImageRepository, MigrationRepository,
    SettingRepository, ShareRepository, SmartAlbumTaskRepository, TagRepository,
};
use crate::services::ai::{
    AestheticScoringProcessor, AiQueueManager, ImageEmbeddingProcessor, ModelClient,
    ModelLoadBalancer, TagEmbeddingProcessor, TaskProcessor,
};
use crate::services::{
    AuthService, IngestService, MigrationService, SearchService, SettingsService, ShareService,
    SmartAlbumService, TrashService,
};
use crate::storage::StorageManager;
use crate::ws::NotificationHub;

/// Everything the handlers and workers need, composed once at startup. No
/// module-level state; tests build their own context against a scratch
/// database.
pub struct AppContext {
    pub pool: PgPool,
    pub images: ImageRepository,
    pub tags: TagRepository,
    pub albums: AlbumRepository,
    pub embeddings: EmbeddingRepository,
    pub queues: AiQueueRepository,
    pub settings: Arc<SettingsService>,
    pub storage: Arc<StorageManager>,
    pub hub: Arc<NotificationHub>,
    pub auth: Arc<AuthService>,
    pub ai: Arc<AiQueueManager>,
    pub ingest: Arc<IngestService>,
    pub migrations: Arc<MigrationService>,
    pub search: Arc<SearchService>,
    pub smart_albums: Arc<SmartAlbumService>,
    pub trash: Arc<TrashService>,
    pub shares: Arc<ShareService>,
    pub shutdown: watch::Sender<bool>,
}

impl AppContext {
    pub async fn build(pool: PgPool) -> Result<Arc<Self>> {
        let images = ImageRepository::new(pool.clone());
        let tags = TagRepository::new(pool.clone());
        let albums = AlbumRepository::new(pool.clone());
        let embeddings = EmbeddingRepository::new(pool.clone());
        let queues = AiQueueRepository::new(pool.clone());
        let migrations_repo = MigrationRepository::new(pool.clone());
        let shares_repo = ShareRepository::new(pool.clone());
        let smart_tasks = SmartAlbumTaskRepository::new(pool.clone());

        let settings = Arc::new(
            SettingsService::load(SettingRepository::new(pool.clone()))
                .await
                .context("load settings")?,
        );

        let storage = Arc::new(StorageManager::new());
        storage
            .rebuild(&settings.snapshot().context("read settings snapshot")?.storage)
            .context("build storage drivers")?;

        let hub = Arc::new(NotificationHub::new());
        let auth = Arc::new(AuthService::new(settings.clone()));

        let balancer = Arc::new(ModelLoadBalancer::new());
        let client = Arc::new(ModelClient::new());
        let processors: Vec<Arc<dyn TaskProcessor>> = vec![
            Arc::new(ImageEmbeddingProcessor::new(
                images.clone(),
                embeddings.clone(),
                queues.clone(),
                storage.clone(),
                client.clone(),
            )),
            Arc::new(TagEmbeddingProcessor::new(
                tags.clone(),
                embeddings.clone(),
                queues.clone(),
                client.clone(),
            )),
            Arc::new(AestheticScoringProcessor::new(
                images.clone(),
                queues.clone(),
                storage.clone(),
                client.clone(),
            )),
        ];
        let ai = Arc::new(AiQueueManager::new(
            queues.clone(),
            hub.clone(),
            settings.clone(),
            balancer.clone(),
            client.clone(),
            processors,
        ));

        let ingest = Arc::new(IngestService::new(
            images.clone(),
            tags.clone(),
            storage.clone(),
            settings.clone(),
            hub.clone(),
            ai.clone(),
        ));
        let migrations = Arc::new(MigrationService::new(
            migrations_repo,
            images.clone(),
            storage.clone(),
            settings.clone(),
            hub.clone(),
        ));
        let search = Arc::new(SearchService::new(
            pool.clone(),
            embeddings.clone(),
            balancer.clone(),
            client.clone(),
        ));
        let smart_albums = Arc::new(SmartAlbumService::new(
            albums.clone(),
            embeddings.clone(),
            smart_tasks,
            balancer,
            client,
            hub.clone(),
        ));
        let trash = Arc::new(TrashService::new(
            images.clone(),
            storage.clone(),
            settings.clone(),
            hub.clone(),
        ));
        let shares = Arc::new(ShareService::new(shares_repo));

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            pool,
            images,
            tags,
            albums,
            embeddings,
            queues,
            settings,
            storage,
            hub,
            auth,
            ai,
            ingest,
            migrations,
            search,
            smart_albums,
            trash,
            shares,
            shutdown,
        }))
    }

    /// Starts the background machinery: AI workers, interrupted migrations
    /// and the retention sweeper.
    pub async fn start_workers(self: &Arc<Self>) -> Result<()> {
        self.ai.start().await.context("start ai queues")?;
        self.migrations
            .resume_interrupted()
            .await
            .context("resume migrations")?;
        let sweeper = self.trash.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            sweeper.run_sweeper(shutdown_rx).await;
        });
        Ok(())
    }

    /// Settings mutations funnel through here so the dependent subsystems
    /// see the new snapshot: storage changes rebuild the driver set, AI
    /// changes reconcile queues and routing.
    pub async fn update_settings(
        self: &Arc<Self>,
        category: SettingCategory,
        payload: JsonValue,
    ) -> Result<JsonValue> {
        let snapshot = self.settings.update_category(category, payload).await?;
        match category {
            SettingCategory::Storage => {
                self.storage
                    .rebuild(&snapshot.storage)
                    .context("rebuild storage drivers")?;
            }
            SettingCategory::Ai => {
                self.ai
                    .apply_settings(&snapshot.ai)
                    .await
                    .context("reconcile ai queues")?;
            }
            _ => {}
        }
        Ok(self.settings.category_payload(category).await?)
    }

    /// Flips the shutdown signal and drains the workers.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.ai.shutdown().await;
    }
}
