use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::services::settings_service::AiProviderConfig;

/// Errors from the model peer, split along the retry boundary.
#[derive(Debug, Error)]
pub enum ModelClientError {
    #[error("transient model error: {0}")]
    Transient(String),
    #[error("model error: {0}")]
    Permanent(String),
}

impl ModelClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelClientError::Transient(_))
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            ModelClientError::Transient(error.to_string())
        } else {
            ModelClientError::Permanent(error.to_string())
        }
    }
}

/// One element to embed: text, inline base64 image or a fetchable URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl EmbeddingContent {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            image: None,
            image_url: None,
        }
    }

    pub fn image_base64(value: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(value.into()),
            image_url: None,
        }
    }

    pub fn image_url(value: impl Into<String>) -> Self {
        Self {
            text: None,
            image: None,
            image_url: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AestheticResult {
    pub score: f32,
    pub level: Option<String>,
    pub distribution: Option<Vec<f32>>,
}

/// One frame of the clustering stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub status: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<ClusterResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub const STATUS_COMPLETED: &'static str = "completed";
    pub const STATUS_FAILED: &'static str = "failed";

    pub fn is_terminal(&self) -> bool {
        self.status == Self::STATUS_COMPLETED || self.status == Self::STATUS_FAILED
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResult {
    pub clusters: Vec<ClusterGroup>,
    #[serde(default)]
    pub noise_image_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroup {
    pub label: i64,
    pub image_ids: Vec<i64>,
    #[serde(default)]
    pub probability: f32,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct AestheticResponse {
    results: Vec<AestheticResult>,
}

/// HTTP/JSON client for the GPU model-serving peer. The peer is opaque; we
/// only depend on its four methods.
pub struct ModelClient {
    http: reqwest::Client,
}

impl ModelClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    fn endpoint(provider: &AiProviderConfig, path: &str) -> String {
        format!("{}{}", provider.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        provider: &AiProviderConfig,
        path: &str,
        body: JsonValue,
    ) -> Result<T, ModelClientError> {
        let response = self
            .http
            .post(Self::endpoint(provider, path))
            .bearer_auth(&provider.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ModelClientError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|error| ModelClientError::Permanent(error.to_string()))
        } else {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                Err(ModelClientError::Transient(format!("{status}: {text}")))
            } else {
                Err(ModelClientError::Permanent(format!("{status}: {text}")))
            }
        }
    }

    pub async fn health(&self, provider: &AiProviderConfig) -> Result<(), ModelClientError> {
        let response = self
            .http
            .get(Self::endpoint(provider, "/health"))
            .bearer_auth(&provider.api_key)
            .timeout(Self::HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(ModelClientError::from_reqwest)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ModelClientError::Permanent(format!(
                "health probe returned {}",
                response.status()
            )))
        }
    }

    /// `CreateMultimodalEmbedding`: one vector per content element, in order.
    pub async fn create_multimodal_embedding(
        &self,
        provider: &AiProviderConfig,
        model: &str,
        contents: &[EmbeddingContent],
    ) -> Result<Vec<Vec<f32>>, ModelClientError> {
        let response: EmbeddingsResponse = self
            .post_json(
                provider,
                "/v1/embeddings",
                json!({ "model": model, "contents": contents }),
            )
            .await?;
        if response.embeddings.len() != contents.len() {
            return Err(ModelClientError::Permanent(format!(
                "provider returned {} embeddings for {} contents",
                response.embeddings.len(),
                contents.len()
            )));
        }
        Ok(response.embeddings)
    }

    /// `EvaluateAesthetic`: one score per base64 image.
    pub async fn evaluate_aesthetic(
        &self,
        provider: &AiProviderConfig,
        images: &[String],
    ) -> Result<Vec<AestheticResult>, ModelClientError> {
        let response: AestheticResponse = self
            .post_json(provider, "/v1/aesthetic", json!({ "images": images }))
            .await?;
        if response.results.len() != images.len() {
            return Err(ModelClientError::Permanent(format!(
                "provider returned {} scores for {} images",
                response.results.len(),
                images.len()
            )));
        }
        Ok(response.results)
    }

    /// `ClusterStream`: newline-delimited `ProgressUpdate` frames until a
    /// terminal status.
    pub async fn cluster_stream(
        &self,
        provider: &AiProviderConfig,
        embeddings: Vec<Vec<f32>>,
        image_ids: Vec<i64>,
        hdbscan_params: JsonValue,
        umap_params: Option<JsonValue>,
        task_id: Uuid,
    ) -> Result<impl Stream<Item = Result<ProgressUpdate, ModelClientError>>, ModelClientError>
    {
        let response = self
            .http
            .post(Self::endpoint(provider, "/v1/cluster"))
            .bearer_auth(&provider.api_key)
            // Clustering large libraries outlives the normal request budget.
            .timeout(Duration::from_secs(3600))
            .json(&json!({
                "embeddings": embeddings,
                "imageIds": image_ids,
                "hdbscanParams": hdbscan_params,
                "umapParams": umap_params,
                "taskId": task_id,
            }))
            .send()
            .await
            .map_err(ModelClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                ModelClientError::Transient(format!("{status}: {text}"))
            } else {
                ModelClientError::Permanent(format!("{status}: {text}"))
            });
        }

        let body = response.bytes_stream();
        // Newline-delimited JSON; one ProgressUpdate per line.
        let stream = futures_util::stream::unfold(
            (Box::pin(body), BytesMut::new(), false),
            |(mut body, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line = buffer.split_to(newline + 1);
                        let trimmed = String::from_utf8_lossy(&line).trim().to_string();
                        if trimmed.is_empty() {
                            continue;
                        }
                        return match serde_json::from_str::<ProgressUpdate>(&trimmed) {
                            Ok(update) => Some((Ok(update), (body, buffer, false))),
                            Err(error) => Some((
                                Err(ModelClientError::Permanent(format!(
                                    "invalid progress frame: {error}"
                                ))),
                                (body, buffer, true),
                            )),
                        };
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(error)) => {
                            return Some((
                                Err(ModelClientError::Transient(error.to_string())),
                                (body, buffer, true),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream)
    }
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new()
    }
}
