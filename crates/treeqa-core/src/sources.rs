//! Collaborator interfaces for linking, knowledge-graph lookup and document
//! retrieval.
//!
//! Concrete implementations live outside the core (see `treeqa-wiki`);
//! test doubles live in [`crate::providers`].

use crate::error::RetrievalError;
use crate::evidence::Passage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Types
// ============================================================================

/// A mention linked to a knowledge-base entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEntity {
    pub mention: String,
    /// Entity URL or bare id, e.g. `http://www.wikidata.org/entity/Q1234`.
    pub knowledge_base_url: String,
    pub definition: String,
}

impl LinkedEntity {
    /// Trailing path segment of the URL (`Q1234`).
    pub fn knowledge_base_id(&self) -> &str {
        let url = self.knowledge_base_url.trim_end_matches('/');
        url.rsplit('/').next().unwrap_or(url)
    }
}

/// Label and short definition of a knowledge-base entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub label: String,
    pub definition: String,
}

/// An entity chosen for retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub id: String,
    pub label: String,
}

/// Relations around one entity, split by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSet {
    /// Entity is the subject.
    pub outgoing: Vec<RelationRef>,
    /// Entity is the object.
    pub incoming: Vec<RelationRef>,
}

impl RelationSet {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }

    pub fn find(&self, direction: Direction, id: &str) -> Option<&RelationRef> {
        let list = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        list.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        })
    }
}

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait EntityLinker: Send + Sync {
    async fn link(&self, text: &str) -> Result<Vec<LinkedEntity>, RetrievalError>;
}

#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Map mention labels to knowledge-base candidates, keyed by id.
    async fn resolve(
        &self,
        labels: &[String],
    ) -> Result<BTreeMap<String, EntityCandidate>, RetrievalError>;
}

#[async_trait]
pub trait RelationCatalog: Send + Sync {
    async fn relations_of(&self, entity_id: &str) -> Result<RelationSet, RetrievalError>;

    /// Value(s) at the other end of `relation_id`; several values come back
    /// as one comma-joined string.
    async fn value_of(
        &self,
        entity_id: &str,
        relation_id: &str,
        direction: Direction,
    ) -> Result<Option<String>, RetrievalError>;
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(
        &self,
        entity: &KnowledgeEntity,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}
