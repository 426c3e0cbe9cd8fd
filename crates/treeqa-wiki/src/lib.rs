//! Wikidata, Wikipedia and entity-linking collaborators for TreeQA
//!
//! Implements the retrieval traits of `treeqa-core`:
//! - [`WikidataClient`]: `EntityResolver` + `RelationCatalog` (search API and SPARQL)
//! - [`WikipediaRetriever`]: `DocumentRetriever` (plain-text extracts, sentence chunks)
//! - [`RelikLinker`] / [`NoopLinker`]: `EntityLinker`
//!
//! Wikidata calls retry connection errors and HTTP 429 with backoff
//! ([`retry::send_with_retry`]). Linking and Wikipedia extract requests are
//! sent once ([`retry::send_once`]).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use treeqa_core::{Collaborators, EntityLinker, RetrievalError};

pub mod embedding;
pub mod linking;
pub mod properties;
pub mod retry;
pub mod wikidata;
pub mod wikipedia;

pub use embedding::{cosine, Embedder, EmbeddingConfig, HttpEmbedder};
pub use linking::{LinkerConfig, LinkerKind, NoopLinker, RelikLinker};
pub use properties::{CatalogError, PropertyCatalog};
pub use retry::RetryConfig;
pub use wikidata::{WikidataClient, WikidataConfig};
pub use wikipedia::{WikipediaConfig, WikipediaRetriever};

// ============================================================================
// Assembly
// ============================================================================

/// Everything needed to stand up the Wikimedia-backed collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    pub wikidata: WikidataConfig,
    pub wikipedia: WikipediaConfig,
    /// Lexical passage ranking when absent.
    pub embedding: Option<EmbeddingConfig>,
    pub linker: LinkerConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Client(#[from] RetrievalError),
}

/// Build the four collaborators from configuration.
///
/// Without a property catalog no relation is ever offered; that is logged
/// but not an error.
pub fn collaborators(config: &WikiConfig) -> Result<Collaborators, SetupError> {
    let properties = match &config.wikidata.property_catalog {
        Some(path) => PropertyCatalog::load(path)?,
        None => {
            tracing::warn!("no property catalog configured, relation lookup will find nothing");
            PropertyCatalog::default()
        }
    };

    let wikidata = WikidataClient::new(config.wikidata.clone(), properties, config.retry.clone())?;

    let mut retriever = WikipediaRetriever::new(config.wikipedia.clone(), wikidata.clone());
    if let Some(embedding) = &config.embedding {
        retriever = retriever.with_embedder(Arc::new(HttpEmbedder::new(embedding.clone())?));
    }

    let linker: Arc<dyn EntityLinker> = match config.linker.kind {
        LinkerKind::Relik => Arc::new(RelikLinker::new(&config.linker)?),
        LinkerKind::None => Arc::new(NoopLinker),
    };

    tracing::debug!(linker = ?config.linker.kind, embedding = config.embedding.is_some(), "wiki collaborators ready");
    let wikidata = Arc::new(wikidata);
    Ok(Collaborators {
        linker,
        resolver: wikidata.clone(),
        catalog: wikidata,
        retriever: Arc::new(retriever),
    })
}
