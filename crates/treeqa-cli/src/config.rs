//! Application configuration.
//!
//! Precedence, lowest first: built-in defaults, TOML file, environment,
//! command-line flags. The result is built once in `main` and passed down.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use treeqa_core::{EngineConfig, ModelConfig};
use treeqa_wiki::{
    EmbeddingConfig, LinkerConfig, RetryConfig, WikiConfig, WikidataConfig, WikipediaConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "treeqa.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 5 }
    }
}

/// `openai` talks to the configured endpoint; `mock` answers offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub model: ModelConfig,
    pub engine: EngineConfig,
    pub wikidata: WikidataConfig,
    pub wikipedia: WikipediaConfig,
    pub embedding: Option<EmbeddingConfig>,
    pub linker: LinkerConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

impl AppConfig {
    /// Read `path`, or `treeqa.toml` in the working directory when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("TREEQA_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("TREEQA_MODEL") {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("TREEQA_BASE_URL") {
            self.model.base_url = base_url;
        }
        if let Some(proxy) = lookup("TREEQA_PROXY") {
            self.model.proxy = Some(proxy.clone());
            self.wikidata.proxy = Some(proxy);
        }
        if let Some(key) = lookup("TREEQA_EMBEDDING_API_KEY") {
            if let Some(embedding) = self.embedding.as_mut() {
                embedding.api_key = Some(key);
            }
        }
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.batch.workers = workers.max(1);
        }
        self
    }

    pub fn wiki(&self) -> WikiConfig {
        WikiConfig {
            wikidata: self.wikidata.clone(),
            wikipedia: self.wikipedia.clone(),
            embedding: self.embedding.clone(),
            linker: self.linker.clone(),
            retry: self.retry.clone(),
        }
    }
}
