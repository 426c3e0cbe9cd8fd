//! Error taxonomy for the reasoning engine.
//!
//! Only [`EngineError`] escapes an episode. Everything else is absorbed at the
//! stage where it happens (a node is left unverified, an entity contributes no
//! evidence) and shows up in the logs.

use std::fmt;

/// Decoding model output into a typed value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// No `{ ... }` span in the model output.
    #[error("model output contains no JSON object")]
    NoJsonObject,
    /// The brace-delimited span is not valid JSON.
    #[error("model output is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Valid JSON that does not match the expected shape.
    #[error("model output does not match the expected schema: {0}")]
    Schema(#[source] serde_json::Error),
    /// Shape-level constraint violated after decoding.
    #[error("model output violates structure: {0}")]
    Structure(String),
}

/// Completion-service failures.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Completion service not configured: {0}")]
    NotConfigured(String),
}

/// Failures of the knowledge-graph, linking and document collaborators.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Episode stage whose model call failed fatally. Refinement failures are
/// absorbed per node and never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Construction,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Construction => "construction",
            Stage::Synthesis => "synthesis",
        };
        f.write_str(name)
    }
}

/// Errors that abort an episode.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The initial tree could not be decoded. No partial tree is kept.
    #[error("tree construction failed: {0}")]
    Construction(#[source] DecodeError),
    /// A model call that has no local recovery failed.
    #[error("{stage} model call failed: {source}")]
    Completion {
        stage: Stage,
        #[source]
        source: LLMError,
    },
}

impl EngineError {
    pub fn completion(stage: Stage, source: LLMError) -> Self {
        EngineError::Completion { stage, source }
    }
}
