use crate::config::{LlmConfig, ModelConfig};
use crate::llm::{build_generator, LlmError, TextGenerator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

type Builder = dyn Fn(&ModelConfig) -> Result<Arc<dyn TextGenerator>, LlmError> + Send + Sync;
type Slot = Arc<OnceCell<Arc<dyn TextGenerator>>>;

/// Model handles keyed by model id, built on first use and kept until
/// `shutdown`.
pub struct ModelRegistry {
    configs: HashMap<String, ModelConfig>,
    default_model: String,
    slots: Mutex<HashMap<String, Slot>>,
    builder: Box<Builder>,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        Self::with_builder(config, build_generator)
    }

    pub fn with_builder<F>(config: &LlmConfig, builder: F) -> Self
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn TextGenerator>, LlmError> + Send + Sync + 'static,
    {
        let configs = config
            .models
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();

        Self {
            configs,
            default_model: config.default_model.clone(),
            slots: Mutex::new(HashMap::new()),
            builder: Box::new(builder),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Configured model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.configs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the handle for `id` (or the default model), building it once.
    ///
    /// Concurrent first requests wait on the same cell, so a model is never
    /// built twice while it stays registered.
    pub async fn get(&self, id: Option<&str>) -> Result<Arc<dyn TextGenerator>, LlmError> {
        let id = id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_model.as_str());

        let config = self
            .configs
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("Unknown model: {}", id)))?;

        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| LlmError::ConfigError("model registry lock poisoned".to_string()))?;
            Arc::clone(slots.entry(id.to_string()).or_default())
        };

        let generator = slot
            .get_or_try_init(|| async {
                info!("Loading model '{}' ({} backend)", config.id, config.backend);
                (self.builder)(config)
            })
            .await?;

        Ok(Arc::clone(generator))
    }

    /// Drops every loaded handle. Later calls to `get` build afresh.
    pub fn shutdown(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            let loaded = slots.values().filter(|s| s.initialized()).count();
            slots.clear();
            info!("Model registry shut down, released {} model(s)", loaded);
        }
    }
}
