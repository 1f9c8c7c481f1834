use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::services::settings_service::{AiProviderConfig, AiSettings};

/// Key used for the providers of the model-less aesthetic queue.
const ALL_PROVIDERS_KEY: &str = "*";

struct ModelEntry {
    providers: Vec<AiProviderConfig>,
    counter: Arc<AtomicUsize>,
}

/// Round-robin dispatch across the providers of a logical model name.
/// `provider_order` returns every provider, rotated so callers can fail
/// over in order after the preferred one; the rotation counter advances
/// once per dispatch, which keeps selections evenly distributed.
pub struct ModelLoadBalancer {
    entries: RwLock<HashMap<String, ModelEntry>>,
}

impl ModelLoadBalancer {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entries_guard(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ModelEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("Failed to lock load balancer routing table"))
    }

    /// Rebuilds the routing table from the AI settings category, preserving
    /// counters of model names that survive the change.
    pub fn rebuild(&self, settings: &AiSettings) -> Result<()> {
        let mut next: HashMap<String, ModelEntry> = HashMap::new();
        {
            let current = self.entries_guard()?;
            for model in settings.model_names() {
                let counter = current
                    .get(&model)
                    .map(|entry| entry.counter.clone())
                    .unwrap_or_else(|| Arc::new(AtomicUsize::new(0)));
                next.insert(
                    model.clone(),
                    ModelEntry {
                        providers: settings.providers_for(&model),
                        counter,
                    },
                );
            }
            let all_counter = current
                .get(ALL_PROVIDERS_KEY)
                .map(|entry| entry.counter.clone())
                .unwrap_or_else(|| Arc::new(AtomicUsize::new(0)));
            next.insert(
                ALL_PROVIDERS_KEY.to_string(),
                ModelEntry {
                    providers: settings.providers.clone(),
                    counter: all_counter,
                },
            );
        }
        *self
            .entries
            .write()
            .map_err(|_| anyhow!("Failed to lock load balancer routing table"))? = next;
        Ok(())
    }

    pub fn model_names(&self) -> Result<Vec<String>> {
        let entries = self.entries_guard()?;
        let mut names: Vec<String> = entries
            .keys()
            .filter(|key| key.as_str() != ALL_PROVIDERS_KEY)
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    /// Providers serving `model_name`, rotated by the model's round-robin
    /// counter. Empty when the model is unknown.
    pub fn provider_order(&self, model_name: &str) -> Result<Vec<AiProviderConfig>> {
        self.rotated(model_name)
    }

    /// All configured providers, rotated; used by model-less tasks.
    pub fn any_provider_order(&self) -> Result<Vec<AiProviderConfig>> {
        self.rotated(ALL_PROVIDERS_KEY)
    }

    fn rotated(&self, key: &str) -> Result<Vec<AiProviderConfig>> {
        let entries = self.entries_guard()?;
        let Some(entry) = entries.get(key) else {
            return Ok(Vec::new());
        };
        if entry.providers.is_empty() {
            return Ok(Vec::new());
        }
        let start = entry.counter.fetch_add(1, Ordering::Relaxed) % entry.providers.len();
        let mut order = Vec::with_capacity(entry.providers.len());
        order.extend_from_slice(&entry.providers[start..]);
        order.extend_from_slice(&entry.providers[..start]);
        Ok(order)
    }
}

impl Default for ModelLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}
