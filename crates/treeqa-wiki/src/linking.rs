//! Entity linking against a ReLiK server.

use crate::retry::send_once;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use treeqa_core::{EntityLinker, LinkedEntity, RetrievalError};
use url::Url;

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkerKind {
    Relik,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub kind: LinkerKind,
    pub server_url: String,
    pub timeout_secs: u64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            kind: LinkerKind::None,
            server_url: "http://localhost:12345/api/relik".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Linking disabled; candidates come from mention search alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinker;

#[async_trait]
impl EntityLinker for NoopLinker {
    async fn link(&self, _text: &str) -> Result<Vec<LinkedEntity>, RetrievalError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// ReLiK
// ============================================================================

#[derive(Debug, Deserialize)]
struct RelikWindow {
    #[serde(default)]
    candidates: Option<RelikCandidates>,
}

#[derive(Debug, Deserialize)]
struct RelikCandidates {
    #[serde(default)]
    span: Vec<Vec<Vec<RelikCandidate>>>,
}

#[derive(Debug, Deserialize)]
struct RelikCandidate {
    text: Option<String>,
    #[serde(default)]
    metadata: RelikMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RelikMetadata {
    wikidata: Option<String>,
    definition: Option<String>,
}

/// Linker backed by a ReLiK `/api/relik` endpoint.
///
/// One request per call; failures surface immediately.
pub struct RelikLinker {
    http: reqwest::Client,
    server_url: String,
}

impl RelikLinker {
    pub fn new(config: &LinkerConfig) -> Result<Self, RetrievalError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            server_url: config.server_url.clone(),
        })
    }
}

#[async_trait]
impl EntityLinker for RelikLinker {
    async fn link(&self, text: &str) -> Result<Vec<LinkedEntity>, RetrievalError> {
        let url = Url::parse_with_params(
            &self.server_url,
            &[
                ("text", text),
                ("is_split_into_words", "false"),
                ("retriever_batch_size", "32"),
                ("reader_batch_size", "32"),
                ("return_windows", "false"),
                ("use_doc_topic", "false"),
                ("annotation_type", "char"),
                ("relation_threshold", "0.5"),
            ],
        )
        .map_err(|e| RetrievalError::Network(format!("invalid linker url {}: {e}", self.server_url)))?;

        let response = send_once(
            self.http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json"),
        )
        .await?;
        let windows: Vec<RelikWindow> = response
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;

        let linked: Vec<LinkedEntity> = windows
            .into_iter()
            .filter_map(|w| w.candidates)
            .filter_map(|c| c.span.into_iter().next()?.into_iter().next())
            .flatten()
            .map(|c| LinkedEntity {
                mention: c.text.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                knowledge_base_url: c.metadata.wikidata.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                definition: c.metadata.definition.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            })
            .collect();
        tracing::debug!(candidates = linked.len(), "relik linked");
        Ok(linked)
    }
}
