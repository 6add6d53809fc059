//! Runtime settings
//!
//! Loaded from an optional `affinity.yaml` in the data root, then overridden by
//! environment variables. Every field has a default so an empty root works
//! offline: missing API keys simply route every stage to its fallback.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai: OpenAiSettings,
    pub embedding: EmbeddingSettings,
    pub captioning: CaptioningSettings,
    pub timeouts: TimeoutSettings,
    pub pipeline: PipelineSettings,
    pub map: MapSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub translation_model: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            translation_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    pub model_version: Option<String>,
    /// Vector length shared by the service request, the fallback and the store
    pub dim: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            model_version: None,
            dim: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptioningSettings {
    /// Captioning sidecar base URL; unset means every photo gets the fallback caption
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub caption_secs: u64,
    pub caption_cold_secs: u64,
    pub translate_secs: u64,
    pub interest_secs: u64,
    pub embed_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            caption_secs: 30,
            caption_cold_secs: 180,
            translate_secs: 15,
            interest_secs: 10,
            embed_secs: 30,
        }
    }
}

impl TimeoutSettings {
    pub fn caption(&self) -> Duration {
        Duration::from_secs(self.caption_secs)
    }

    pub fn caption_cold(&self) -> Duration {
        Duration::from_secs(self.caption_cold_secs.max(self.caption_secs))
    }

    pub fn translate(&self) -> Duration {
        Duration::from_secs(self.translate_secs)
    }

    pub fn interest(&self) -> Duration {
        Duration::from_secs(self.interest_secs)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub recent_caption_limit: Option<usize>,
    pub workers: usize,
    pub queue_capacity: usize,
    pub embedding_log: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            recent_caption_limit: Some(20),
            workers: 2,
            queue_capacity: 64,
            embedding_log: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
    pub cache_capacity: usize,
    pub power_iterations: usize,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            width: 390.0,
            height: 520.0,
            padding: 48.0,
            cache_capacity: 128,
            power_iterations: 12,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file (if present) and apply env overrides
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut settings = if config_path.exists() {
            let raw = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("Invalid settings in {}", config_path.display()))?
        } else {
            Settings::default()
        };

        settings.apply_env();
        settings.log_summary();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_TRANSLATION_MODEL") {
            self.openai.translation_model = model;
        }
        if let Ok(model) = std::env::var("OPENAI_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(version) = std::env::var("OPENAI_EMBED_MODEL_VERSION") {
            self.embedding.model_version = Some(version);
        }
        if let Some(dim) = std::env::var("AFFINITY_EMBED_DIM")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|dim| *dim > 0)
        {
            self.embedding.dim = dim;
        }
        if let Ok(url) = std::env::var("AFFINITY_CAPTION_URL") {
            self.captioning.endpoint = Some(url);
        }

        // Blank keys behave exactly like missing ones
        if self.openai.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.openai.api_key = None;
        }
    }

    fn log_summary(&self) {
        fn preview(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.chars().take(5).collect::<String>();
                    format!("{}...({} chars)", n, v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::debug!(
            api_key = %preview(&self.openai.api_key),
            embed_model = %self.embedding.model,
            dim = self.embedding.dim,
            caption_endpoint = %self.captioning.endpoint.as_deref().unwrap_or("<not set>"),
            "settings loaded"
        );
    }
}
