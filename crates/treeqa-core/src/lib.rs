//! TreeQA Core: Self-Adaptive Hierarchical Reasoning
//!
//! Decomposes a question into a logic tree of sub-questions with concrete
//! hypothesis answers, checks every node against retrieved evidence, repairs
//! refuted subtrees in place, and synthesizes a final answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          REASONING EPISODE                               │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  question ──► TreeBuilder ──► LogicTree ──► TreeWalker (pre-order)       │
//! │                                                 │                        │
//! │                                       ┌─────────▼─────────┐              │
//! │                                       │   NodeVerifier    │              │
//! │                                       │ gather ─► judge   │              │
//! │                                       │   │   escalate×1  │              │
//! │                                       └───┼───────┬───────┘              │
//! │                                           │       │ refuted              │
//! │                    ┌──────────────────────▼┐  ┌───▼────────────┐         │
//! │                    │  QueryInfoGatherer    │  │ SubtreeRepairer│         │
//! │                    │ link/resolve/filter   │  │ (same shape)   │         │
//! │                    │ relations + passages  │  └────────────────┘         │
//! │                    └──────────┬────────────┘                             │
//! │                               ▼                                          │
//! │                          EvidenceBox                                     │
//! │                                                                          │
//! │  LogicTree ──► AnswerSynthesizer ──► final answer + metrics              │
//! │                                                                          │
//! │  Accounting: tokens (every model call, once) + fix count (per repair)    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure model
//! - Tree construction and answer synthesis failures end the episode.
//! - Undecodable judgments and failed repairs leave the node as it was.
//! - A failed entity, relation or passage fetch contributes no evidence.

pub mod accounting;
pub mod builder;
pub mod config;
pub mod decode;
pub mod episode;
pub mod error;
pub mod evidence;
pub mod gather;
pub mod llm;
pub mod prompts;
pub mod providers;
pub mod repair;
pub mod sources;
pub mod synthesize;
pub mod tree;
pub mod verify;
pub mod walker;

pub use accounting::{Accounting, AccountingSnapshot};
pub use builder::TreeBuilder;
pub use config::{EngineConfig, EvidenceLimits};
pub use decode::decode_model_json;
pub use episode::{Engine, EpisodeMetrics, EpisodeReport, EpisodeStatus};
pub use error::{DecodeError, EngineError, LLMError, RetrievalError, Stage};
pub use evidence::{EvidenceBox, GraphFact, Insert, Passage};
pub use gather::{Collaborators, GatherOutcome, QueryInfoGatherer};
pub use llm::{Completion, CompletionService, MeteredModel};
pub use repair::SubtreeRepairer;
pub use sources::{
    Direction, DocumentRetriever, EntityCandidate, EntityLinker, EntityResolver,
    KnowledgeEntity, LinkedEntity, RelationCatalog, RelationRef, RelationSet,
};
pub use synthesize::AnswerSynthesizer;
pub use tree::{LogicTree, Node, NodePath, References, TreeRecord, SOURCE_WIKIDATA, SOURCE_WIKIPEDIA};
pub use verify::{Judgment, NodeVerifier, Outcome, Verdict, Verification};
pub use walker::{TreeWalker, WalkSummary};

#[cfg(feature = "openai")]
pub use llm::providers::{ModelConfig, OpenAICompatibleClient};
