use anyhow::{Context, Result, anyhow};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};

use crate::entities::SettingCategory;
use crate::repositories::SettingRepository;
use crate::storage::StorageSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub site_title: String,
    pub max_upload_bytes: i64,
    pub default_page_size: i64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            site_title: "Lumen Photos".to_string(),
            max_upload_bytes: 512 * 1024 * 1024,
            default_page_size: 50,
        }
    }
}

/// One endpoint + credentials serving one or more logical model names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiSettings {
    pub providers: Vec<AiProviderConfig>,
    pub image_embedding_enabled: bool,
    pub tag_embedding_enabled: bool,
    pub aesthetic_enabled: bool,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            image_embedding_enabled: true,
            tag_embedding_enabled: true,
            aesthetic_enabled: true,
        }
    }
}

impl AiSettings {
    /// Distinct model names across all providers, in first-seen order.
    pub fn model_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for provider in &self.providers {
            for model in &provider.models {
                if !names.contains(model) {
                    names.push(model.clone());
                }
            }
        }
        names
    }

    pub fn providers_for(&self, model_name: &str) -> Vec<AiProviderConfig> {
        self.providers
            .iter()
            .filter(|provider| provider.models.iter().any(|m| m == model_name))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSettings {
    pub auto_delete_days: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            auto_delete_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    pub username: String,
    pub password_hash: String,
    /// Bumped on every password change; JWTs carrying an older version are
    /// rejected.
    pub password_version: i64,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

/// Fields accepted on an auth category update; the password arrives in
/// plaintext and is hashed here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthSettingsUpdate {
    username: Option<String>,
    password: Option<String>,
    token_ttl_hours: Option<i64>,
}

/// Immutable view of all live configuration; cheap to clone by Arc.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub general: GeneralSettings,
    pub storage: StorageSettings,
    pub ai: AiSettings,
    pub retention: RetentionSettings,
    pub auth: AuthSettings,
    pub version: u64,
}

/// Versioned live-reloadable configuration. Reads clone the current Arc
/// under a shared lock; mutations persist the category row, rebuild the
/// snapshot and swap it in under the exclusive lock.
pub struct SettingsService {
    repository: SettingRepository,
    snapshot: RwLock<Arc<SettingsSnapshot>>,
}

impl SettingsService {
    const DEFAULT_USERNAME: &'static str = "admin";
    const DEFAULT_PASSWORD: &'static str = "admin";
    const DEFAULT_TOKEN_TTL_HOURS: i64 = 24 * 7;

    pub async fn load(repository: SettingRepository) -> Result<Self> {
        Self::seed_defaults(&repository).await?;
        let snapshot = Self::build_snapshot(&repository).await?;
        Ok(Self {
            repository,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn snapshot(&self) -> Result<Arc<SettingsSnapshot>> {
        Ok(self
            .snapshot
            .read()
            .map_err(|_| anyhow!("Failed to lock settings snapshot"))?
            .clone())
    }

    pub async fn category_payload(&self, category: SettingCategory) -> Result<JsonValue> {
        let snapshot = self.snapshot()?;
        let value = match category {
            SettingCategory::General => serde_json::to_value(&snapshot.general)?,
            SettingCategory::Storage => serde_json::to_value(&snapshot.storage)?,
            SettingCategory::Ai => serde_json::to_value(&snapshot.ai)?,
            SettingCategory::Retention => serde_json::to_value(&snapshot.retention)?,
            SettingCategory::Auth => {
                // Never hand hashes or the signing secret to clients.
                serde_json::json!({
                    "username": snapshot.auth.username,
                    "tokenTtlHours": snapshot.auth.token_ttl_hours,
                    "passwordVersion": snapshot.auth.password_version,
                })
            }
        };
        Ok(value)
    }

    /// Persists a category payload and swaps in the rebuilt snapshot, which
    /// is also returned so callers can react (driver rebuild, queue refresh).
    pub async fn update_category(
        &self,
        category: SettingCategory,
        payload: JsonValue,
    ) -> Result<Arc<SettingsSnapshot>> {
        let canonical = self.canonicalize(category, payload)?;
        self.repository.upsert(category, &canonical).await?;
        let rebuilt = Self::build_snapshot(&self.repository).await?;
        let shared = Arc::new(rebuilt);
        *self
            .snapshot
            .write()
            .map_err(|_| anyhow!("Failed to lock settings snapshot"))? = shared.clone();
        log::info!("settings category {category} updated (version {})", shared.version);
        Ok(shared)
    }

    /// Validates the payload against the category's shape and normalizes it
    /// to the stored form.
    fn canonicalize(&self, category: SettingCategory, payload: JsonValue) -> Result<JsonValue> {
        match category {
            SettingCategory::General => {
                let parsed: GeneralSettings =
                    serde_json::from_value(payload).context("invalid general settings")?;
                if parsed.max_upload_bytes <= 0 {
                    return Err(anyhow!("maxUploadBytes must be positive"));
                }
                Ok(serde_json::to_value(parsed)?)
            }
            SettingCategory::Storage => {
                let parsed: StorageSettings =
                    serde_json::from_value(payload).context("invalid storage settings")?;
                if parsed.drivers.is_empty() {
                    return Err(anyhow!("at least one storage driver is required"));
                }
                Ok(serde_json::to_value(parsed)?)
            }
            SettingCategory::Ai => {
                let parsed: AiSettings =
                    serde_json::from_value(payload).context("invalid ai settings")?;
                Ok(serde_json::to_value(parsed)?)
            }
            SettingCategory::Retention => {
                let parsed: RetentionSettings =
                    serde_json::from_value(payload).context("invalid retention settings")?;
                if parsed.auto_delete_days < 1 {
                    return Err(anyhow!("autoDeleteDays must be at least 1"));
                }
                Ok(serde_json::to_value(parsed)?)
            }
            SettingCategory::Auth => {
                let update: AuthSettingsUpdate =
                    serde_json::from_value(payload).context("invalid auth settings")?;
                let current = self.snapshot()?.auth.clone();
                let mut next = current.clone();
                if let Some(username) = update.username {
                    if username.trim().is_empty() {
                        return Err(anyhow!("username must not be empty"));
                    }
                    next.username = username;
                }
                if let Some(ttl) = update.token_ttl_hours {
                    if ttl < 1 {
                        return Err(anyhow!("tokenTtlHours must be at least 1"));
                    }
                    next.token_ttl_hours = ttl;
                }
                if let Some(password) = update.password {
                    if password.len() < 4 {
                        return Err(anyhow!("password too short"));
                    }
                    next.password_hash =
                        bcrypt::hash(&password, bcrypt::DEFAULT_COST).context("hash password")?;
                    next.password_version = current.password_version + 1;
                }
                Ok(serde_json::to_value(next)?)
            }
        }
    }

    async fn seed_defaults(repository: &SettingRepository) -> Result<()> {
        repository
            .seed_default(
                SettingCategory::General,
                &serde_json::to_value(GeneralSettings::default())?,
            )
            .await?;
        repository
            .seed_default(
                SettingCategory::Storage,
                &serde_json::to_value(StorageSettings::default())?,
            )
            .await?;
        repository
            .seed_default(
                SettingCategory::Ai,
                &serde_json::to_value(AiSettings::default())?,
            )
            .await?;
        repository
            .seed_default(
                SettingCategory::Retention,
                &serde_json::to_value(RetentionSettings::default())?,
            )
            .await?;

        let default_auth = AuthSettings {
            username: Self::DEFAULT_USERNAME.to_string(),
            password_hash: bcrypt::hash(Self::DEFAULT_PASSWORD, bcrypt::DEFAULT_COST)
                .context("hash default password")?,
            password_version: 1,
            jwt_secret: Self::random_secret(),
            token_ttl_hours: Self::DEFAULT_TOKEN_TTL_HOURS,
        };
        repository
            .seed_default(SettingCategory::Auth, &serde_json::to_value(default_auth)?)
            .await?;
        Ok(())
    }

    async fn build_snapshot(repository: &SettingRepository) -> Result<SettingsSnapshot> {
        let mut snapshot = SettingsSnapshot {
            general: GeneralSettings::default(),
            storage: StorageSettings::default(),
            ai: AiSettings::default(),
            retention: RetentionSettings::default(),
            auth: AuthSettings {
                username: Self::DEFAULT_USERNAME.to_string(),
                password_hash: String::new(),
                password_version: 1,
                jwt_secret: Self::random_secret(),
                token_ttl_hours: Self::DEFAULT_TOKEN_TTL_HOURS,
            },
            version: 0,
        };

        for row in repository.all().await? {
            snapshot.version = snapshot.version.max(row.version as u64);
            match row.category.parse::<SettingCategory>() {
                Ok(SettingCategory::General) => {
                    snapshot.general = serde_json::from_value(row.payload)
                        .context("stored general settings are invalid")?;
                }
                Ok(SettingCategory::Storage) => {
                    snapshot.storage = serde_json::from_value(row.payload)
                        .context("stored storage settings are invalid")?;
                }
                Ok(SettingCategory::Ai) => {
                    snapshot.ai = serde_json::from_value(row.payload)
                        .context("stored ai settings are invalid")?;
                }
                Ok(SettingCategory::Retention) => {
                    snapshot.retention = serde_json::from_value(row.payload)
                        .context("stored retention settings are invalid")?;
                }
                Ok(SettingCategory::Auth) => {
                    snapshot.auth = serde_json::from_value(row.payload)
                        .context("stored auth settings are invalid")?;
                }
                Err(()) => log::warn!("ignoring unknown settings category {}", row.category),
            }
        }
        Ok(snapshot)
    }

    fn random_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        hex::encode(bytes)
    }
}
