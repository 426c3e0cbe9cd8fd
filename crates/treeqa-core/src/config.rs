//! Engine knobs. Built once by the caller and passed into [`crate::Engine`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Entities kept after the relevance filter.
    pub entity_top_k: usize,
    /// Relations selected per direction for each entity.
    pub relation_top_k: usize,
    /// Passages requested per entity.
    pub passage_top_k: usize,
    pub evidence: EvidenceLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_top_k: 2,
            relation_top_k: 1,
            passage_top_k: 2,
            evidence: EvidenceLimits::default(),
        }
    }
}

/// Upper bounds for one evidence box, escalation included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceLimits {
    pub max_graph_facts: usize,
    pub max_passages: usize,
}

impl Default for EvidenceLimits {
    fn default() -> Self {
        Self {
            max_graph_facts: 64,
            max_passages: 16,
        }
    }
}
