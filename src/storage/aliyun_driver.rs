use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::storage::driver::{
    BlobStat, ByteStream, StorageCapacity, StorageDriver, StorageError, validate_path,
};

const OPENAPI_BASE: &str = "https://openapi.alipan.com";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 120;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliyunDriverConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Library root folder inside the drive; blobs live under it.
    pub root_folder: String,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

struct DriveState {
    token: Option<CachedToken>,
    drive_id: Option<String>,
    folder_ids: HashMap<String, String>,
}

/// Aliyun Drive backend via the OpenAPI. Reads are always proxied through
/// the server (`url_for` is None): download URLs are short-lived and bound
/// to the access token.
pub struct AliyunDriver {
    id: String,
    name: String,
    config: AliyunDriverConfig,
    http: reqwest::Client,
    state: Mutex<DriveState>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct DriveInfoResponse {
    default_drive_id: String,
}

#[derive(Deserialize)]
struct FileEntry {
    file_id: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CreateResponse {
    file_id: String,
    #[serde(default)]
    upload_id: Option<String>,
    #[serde(default)]
    part_info_list: Option<Vec<PartInfo>>,
}

#[derive(Deserialize)]
struct PartInfo {
    upload_url: String,
}

#[derive(Deserialize)]
struct DownloadUrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct SpaceInfoResponse {
    personal_space_info: SpaceInfo,
}

#[derive(Deserialize)]
struct SpaceInfo {
    used_size: u64,
    total_size: u64,
}

impl AliyunDriver {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: AliyunDriverConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            http: reqwest::Client::new(),
            state: Mutex::new(DriveState {
                token: None,
                drive_id: None,
                folder_ids: HashMap::new(),
            }),
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> StorageError {
        if status == reqwest::StatusCode::NOT_FOUND {
            StorageError::NotFound(body.to_string())
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            StorageError::PermissionDenied(body.to_string())
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            StorageError::Transient(format!("aliyun {status}: {body}"))
        } else {
            StorageError::Permanent(format!("aliyun {status}: {body}"))
        }
    }

    fn map_request_error(error: reqwest::Error) -> StorageError {
        if error.is_timeout() || error.is_connect() {
            StorageError::Transient(error.to_string())
        } else {
            StorageError::Permanent(error.to_string())
        }
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.token {
            if token.expires_at > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .http
            .post(format!("{OPENAPI_BASE}/oauth/access_token"))
            .json(&json!({
                "grant_type": "refresh_token",
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "refresh_token": self.config.refresh_token,
            }))
            .send()
            .await
            .map_err(Self::map_request_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| StorageError::Permanent(error.to_string()))?;
        let expires_at = Utc::now()
            + chrono::Duration::seconds((token.expires_in - TOKEN_REFRESH_MARGIN_SECS).max(60));
        state.token = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn api_call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, StorageError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{OPENAPI_BASE}{endpoint}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }
        response
            .json()
            .await
            .map_err(|error| StorageError::Permanent(error.to_string()))
    }

    async fn drive_id(&self) -> Result<String, StorageError> {
        {
            let state = self.state.lock().await;
            if let Some(drive_id) = &state.drive_id {
                return Ok(drive_id.clone());
            }
        }
        let info: DriveInfoResponse = self
            .api_call("/adrive/v1.0/user/getDriveInfo", json!({}))
            .await?;
        let mut state = self.state.lock().await;
        state.drive_id = Some(info.default_drive_id.clone());
        Ok(info.default_drive_id)
    }

    fn full_path(&self, path: &str) -> String {
        format!("/{}/{}", self.config.root_folder.trim_matches('/'), path)
    }

    async fn find_by_path(&self, path: &str) -> Result<FileEntry, StorageError> {
        let drive_id = self.drive_id().await?;
        self.api_call(
            "/adrive/v1.0/openFile/get_by_path",
            json!({
                "drive_id": drive_id,
                "file_path": self.full_path(path),
            }),
        )
        .await
        .map_err(|error| match error {
            StorageError::NotFound(_) => StorageError::NotFound(path.to_string()),
            other => other,
        })
    }

    /// Resolves (creating as needed) the folder that should contain `path`,
    /// returning its file id. Folder ids are cached per process.
    async fn ensure_parent_folder(&self, path: &str) -> Result<String, StorageError> {
        let drive_id = self.drive_id().await?;
        let mut segments: Vec<&str> = self
            .config
            .root_folder
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let relative: Vec<&str> = path.split('/').collect();
        segments.extend(relative.iter().take(relative.len().saturating_sub(1)).copied());

        let mut parent_id = "root".to_string();
        let mut walked = String::new();
        for segment in segments {
            walked.push('/');
            walked.push_str(segment);
            let cached = {
                let state = self.state.lock().await;
                state.folder_ids.get(&walked).cloned()
            };
            if let Some(folder_id) = cached {
                parent_id = folder_id;
                continue;
            }
            let created: CreateResponse = self
                .api_call(
                    "/adrive/v1.0/openFile/create",
                    json!({
                        "drive_id": drive_id,
                        "parent_file_id": parent_id,
                        "name": segment,
                        "type": "folder",
                        "check_name_mode": "refuse",
                    }),
                )
                .await?;
            let mut state = self.state.lock().await;
            state.folder_ids.insert(walked.clone(), created.file_id.clone());
            parent_id = created.file_id;
        }
        Ok(parent_id)
    }
}

#[async_trait]
impl StorageDriver for AliyunDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        path: &str,
        mut body: ByteStream,
        _content_type: &str,
    ) -> Result<u64, StorageError> {
        validate_path(path)?;
        let drive_id = self.drive_id().await?;
        let parent_id = self.ensure_parent_folder(path).await?;
        let file_name = path.rsplit('/').next().unwrap_or(path);

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let size = buffer.len() as u64;

        let created: CreateResponse = self
            .api_call(
                "/adrive/v1.0/openFile/create",
                json!({
                    "drive_id": drive_id,
                    "parent_file_id": parent_id,
                    "name": file_name,
                    "type": "file",
                    "check_name_mode": "overwrite",
                    "size": size,
                    "part_info_list": [{"part_number": 1}],
                }),
            )
            .await?;

        let upload_url = created
            .part_info_list
            .as_ref()
            .and_then(|parts| parts.first())
            .map(|part| part.upload_url.clone())
            .ok_or_else(|| StorageError::Permanent("aliyun create returned no upload url".to_string()))?;

        let put = self
            .http
            .put(upload_url)
            .body(buffer.freeze())
            .send()
            .await
            .map_err(Self::map_request_error)?;
        if !put.status().is_success() {
            let status = put.status();
            let text = put.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }

        let _: serde_json::Value = self
            .api_call(
                "/adrive/v1.0/openFile/complete",
                json!({
                    "drive_id": drive_id,
                    "file_id": created.file_id,
                    "upload_id": created.upload_id,
                }),
            )
            .await?;
        Ok(size)
    }

    async fn download(&self, path: &str) -> Result<(ByteStream, u64), StorageError> {
        validate_path(path)?;
        let entry = self.find_by_path(path).await?;
        let drive_id = self.drive_id().await?;
        let download: DownloadUrlResponse = self
            .api_call(
                "/adrive/v1.0/openFile/getDownloadUrl",
                json!({
                    "drive_id": drive_id,
                    "file_id": entry.file_id,
                }),
            )
            .await?;

        let response = self
            .http
            .get(download.url)
            .send()
            .await
            .map_err(Self::map_request_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &text));
        }
        let size = response
            .content_length()
            .or(entry.size)
            .unwrap_or_default();
        let stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        Ok((stream, size))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let entry = match self.find_by_path(path).await {
            Ok(entry) => entry,
            Err(StorageError::NotFound(_)) => return Ok(()),
            Err(error) => return Err(error),
        };
        let drive_id = self.drive_id().await?;
        let _: serde_json::Value = self
            .api_call(
                "/adrive/v1.0/openFile/recyclebin/trash",
                json!({
                    "drive_id": drive_id,
                    "file_id": entry.file_id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.find_by_path(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn stat(&self, path: &str) -> Result<BlobStat, StorageError> {
        let entry = self.find_by_path(path).await?;
        Ok(BlobStat {
            size: entry.size.unwrap_or_default(),
            modified: entry.updated_at,
        })
    }

    fn url_for(&self, _path: &str) -> Option<String> {
        // Download URLs are token-bound and expire in minutes; reads must go
        // through the backend proxy.
        None
    }

    async fn capacity(&self) -> Result<StorageCapacity, StorageError> {
        let info: SpaceInfoResponse = self
            .api_call("/adrive/v1.0/user/getSpaceInfo", json!({}))
            .await?;
        Ok(StorageCapacity {
            used_bytes: info.personal_space_info.used_size,
            total_bytes: Some(info.personal_space_info.total_size),
        })
    }
}
