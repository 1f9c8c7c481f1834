use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use pgvector::Vector;
use std::sync::Arc;
use thiserror::Error;

use crate::entities::{AiTaskItem, AiTaskType};
use crate::repositories::{AiQueueRepository, EmbeddingRepository, ImageRepository, TagRepository};
use crate::services::ai::model_client::{EmbeddingContent, ModelClient, ModelClientError};
use crate::services::settings_service::AiProviderConfig;
use crate::storage::{StorageError, StorageManager};

pub const ITEM_TYPE_IMAGE: &str = "image";
pub const ITEM_TYPE_TAG: &str = "tag";

/// Outcome of one processing attempt against one provider.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl ProcessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }
}

impl From<ModelClientError> for ProcessError {
    fn from(error: ModelClientError) -> Self {
        match error {
            ModelClientError::Transient(message) => ProcessError::Transient(message),
            ModelClientError::Permanent(message) => ProcessError::Permanent(message),
        }
    }
}

impl From<StorageError> for ProcessError {
    fn from(error: StorageError) -> Self {
        if error.is_transient() {
            ProcessError::Transient(error.to_string())
        } else {
            ProcessError::Permanent(error.to_string())
        }
    }
}

impl From<sqlx::Error> for ProcessError {
    fn from(error: sqlx::Error) -> Self {
        ProcessError::Transient(error.to_string())
    }
}

/// Work specific to one task type. Implementations must be idempotent: an
/// item interrupted mid-flight is re-run on the next start.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> AiTaskType;

    fn item_type(&self) -> &'static str;

    /// Processes one item against one provider. Returning Ok means the item
    /// can be deleted; a stale item (its subject vanished) is also Ok.
    async fn process(
        &self,
        item: &AiTaskItem,
        provider: &AiProviderConfig,
        model_name: Option<&str>,
    ) -> Result<(), ProcessError>;

    /// Enqueues every item the queue is missing; used when a model comes
    /// online or a backlog is rebuilt. Returns the number enqueued.
    async fn enqueue_all(&self, queue_id: i64, model_name: Option<&str>) -> Result<u64>;
}

async fn blob_as_base64(
    storage: &StorageManager,
    storage_id: &str,
    path: &str,
) -> Result<String, ProcessError> {
    let (mut stream, size) = storage.download(Some(storage_id), path).await?;
    let mut bytes = Vec::with_capacity(size as usize);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| ProcessError::Transient(error.to_string()))?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(BASE64.encode(bytes))
}

pub struct ImageEmbeddingProcessor {
    images: ImageRepository,
    embeddings: EmbeddingRepository,
    queues: AiQueueRepository,
    storage: Arc<StorageManager>,
    client: Arc<ModelClient>,
}

impl ImageEmbeddingProcessor {
    pub fn new(
        images: ImageRepository,
        embeddings: EmbeddingRepository,
        queues: AiQueueRepository,
        storage: Arc<StorageManager>,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            images,
            embeddings,
            queues,
            storage,
            client,
        }
    }
}

#[async_trait]
impl TaskProcessor for ImageEmbeddingProcessor {
    fn task_type(&self) -> AiTaskType {
        AiTaskType::ImageEmbedding
    }

    fn item_type(&self) -> &'static str {
        ITEM_TYPE_IMAGE
    }

    async fn process(
        &self,
        item: &AiTaskItem,
        provider: &AiProviderConfig,
        model_name: Option<&str>,
    ) -> Result<(), ProcessError> {
        let model = model_name
            .ok_or_else(|| ProcessError::Permanent("image embedding requires a model".into()))?;
        let Some(image) = self.images.get_live(item.item_id).await? else {
            // Deleted while queued; nothing left to do.
            return Ok(());
        };

        // Thumbnails are smaller and already normalized; fall back to the
        // original when one is missing.
        let content = match &image.thumbnail_path {
            Some(thumb) => {
                let thumbnail_driver = self
                    .storage
                    .thumbnail_driver()
                    .map_err(ProcessError::from)?;
                let encoded =
                    blob_as_base64(&self.storage, thumbnail_driver.id(), thumb).await?;
                EmbeddingContent::image_base64(encoded)
            }
            None => {
                let encoded =
                    blob_as_base64(&self.storage, &image.storage_id, &image.storage_path).await?;
                EmbeddingContent::image_base64(encoded)
            }
        };

        let mut vectors = self
            .client
            .create_multimodal_embedding(provider, model, &[content])
            .await?;
        let vector = vectors.pop().flatten_empty(model)?;
        self.embeddings
            .upsert_image(image.id, model, Vector::from(vector))
            .await?;
        Ok(())
    }

    async fn enqueue_all(&self, queue_id: i64, model_name: Option<&str>) -> Result<u64> {
        let Some(model) = model_name else {
            return Ok(0);
        };
        let mut enqueued = 0;
        for image_id in self.embeddings.image_ids_missing(model).await? {
            if self.queues.enqueue(queue_id, image_id, ITEM_TYPE_IMAGE).await? {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }
}

pub struct TagEmbeddingProcessor {
    tags: TagRepository,
    embeddings: EmbeddingRepository,
    queues: AiQueueRepository,
    client: Arc<ModelClient>,
}

impl TagEmbeddingProcessor {
    pub fn new(
        tags: TagRepository,
        embeddings: EmbeddingRepository,
        queues: AiQueueRepository,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            tags,
            embeddings,
            queues,
            client,
        }
    }
}

#[async_trait]
impl TaskProcessor for TagEmbeddingProcessor {
    fn task_type(&self) -> AiTaskType {
        AiTaskType::TagEmbedding
    }

    fn item_type(&self) -> &'static str {
        ITEM_TYPE_TAG
    }

    async fn process(
        &self,
        item: &AiTaskItem,
        provider: &AiProviderConfig,
        model_name: Option<&str>,
    ) -> Result<(), ProcessError> {
        let model = model_name
            .ok_or_else(|| ProcessError::Permanent("tag embedding requires a model".into()))?;
        let Some(tag) = self.tags.get(item.item_id).await? else {
            return Ok(());
        };

        let mut vectors = self
            .client
            .create_multimodal_embedding(provider, model, &[EmbeddingContent::text(&tag.name)])
            .await?;
        let vector = vectors.pop().flatten_empty(model)?;
        self.embeddings
            .upsert_tag(tag.id, model, Vector::from(vector))
            .await?;
        Ok(())
    }

    async fn enqueue_all(&self, queue_id: i64, model_name: Option<&str>) -> Result<u64> {
        let Some(model) = model_name else {
            return Ok(0);
        };
        let mut enqueued = 0;
        for tag_id in self.embeddings.tag_ids_missing(model).await? {
            if self.queues.enqueue(queue_id, tag_id, ITEM_TYPE_TAG).await? {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }
}

pub struct AestheticScoringProcessor {
    images: ImageRepository,
    queues: AiQueueRepository,
    storage: Arc<StorageManager>,
    client: Arc<ModelClient>,
}

impl AestheticScoringProcessor {
    pub fn new(
        images: ImageRepository,
        queues: AiQueueRepository,
        storage: Arc<StorageManager>,
        client: Arc<ModelClient>,
    ) -> Self {
        Self {
            images,
            queues,
            storage,
            client,
        }
    }
}

#[async_trait]
impl TaskProcessor for AestheticScoringProcessor {
    fn task_type(&self) -> AiTaskType {
        AiTaskType::AestheticScoring
    }

    fn item_type(&self) -> &'static str {
        ITEM_TYPE_IMAGE
    }

    async fn process(
        &self,
        item: &AiTaskItem,
        provider: &AiProviderConfig,
        _model_name: Option<&str>,
    ) -> Result<(), ProcessError> {
        let Some(image) = self.images.get_live(item.item_id).await? else {
            return Ok(());
        };

        let encoded = match &image.thumbnail_path {
            Some(thumb) => {
                let thumbnail_driver = self
                    .storage
                    .thumbnail_driver()
                    .map_err(ProcessError::from)?;
                blob_as_base64(&self.storage, thumbnail_driver.id(), thumb).await?
            }
            None => blob_as_base64(&self.storage, &image.storage_id, &image.storage_path).await?,
        };

        let mut results = self.client.evaluate_aesthetic(provider, &[encoded]).await?;
        let result = results
            .pop()
            .ok_or_else(|| ProcessError::Permanent("provider returned no score".into()))?;
        self.images.set_ai_score(image.id, result.score).await?;
        Ok(())
    }

    async fn enqueue_all(&self, queue_id: i64, _model_name: Option<&str>) -> Result<u64> {
        let mut enqueued = 0;
        for image_id in self.images.ids_missing_score().await? {
            if self.queues.enqueue(queue_id, image_id, ITEM_TYPE_IMAGE).await? {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }
}

trait FlattenEmpty {
    fn flatten_empty(self, model: &str) -> Result<Vec<f32>, ProcessError>;
}

impl FlattenEmpty for Option<Vec<f32>> {
    fn flatten_empty(self, model: &str) -> Result<Vec<f32>, ProcessError> {
        match self {
            Some(vector) if !vector.is_empty() => Ok(vector),
            _ => Err(ProcessError::Permanent(format!(
                "provider returned an empty embedding for model {model}"
            ))),
        }
    }
}
