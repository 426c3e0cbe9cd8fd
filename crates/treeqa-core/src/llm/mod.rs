//! Completion-service interface and token metering.
//!
//! Every stage talks to the reasoning model through a [`MeteredModel`], which
//! forwards to a [`CompletionService`] and adds the reported token cost to the
//! episode's [`Accounting`] exactly once per call.

use crate::accounting::Accounting;
use crate::decode::decode_model_json;
use crate::error::{DecodeError, LLMError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[cfg(feature = "openai")]
pub mod providers;

// ============================================================================
// Completion Service Interface
// ============================================================================

/// A chat-style model: system prompt plus one user message in, text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_text: &str)
        -> Result<Completion, LLMError>;

    /// Model name for logs and records.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Response text and the call's total token cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>, tokens: u64) -> Self {
        Self {
            text: text.into(),
            tokens,
        }
    }
}

// ============================================================================
// Metered Model
// ============================================================================

/// A completion service bound to one episode's accounting.
#[derive(Clone)]
pub struct MeteredModel {
    service: Arc<dyn CompletionService>,
    accounting: Arc<Accounting>,
}

impl MeteredModel {
    pub fn new(service: Arc<dyn CompletionService>, accounting: Arc<Accounting>) -> Self {
        Self {
            service,
            accounting,
        }
    }

    pub fn accounting(&self) -> &Arc<Accounting> {
        &self.accounting
    }

    pub async fn complete(&self, system_prompt: &str, user_text: &str) -> Result<String, LLMError> {
        let completion = self.service.complete(system_prompt, user_text).await?;
        self.accounting.add_call(completion.tokens);
        tracing::debug!(
            model = self.service.model_name(),
            tokens = completion.tokens,
            total = self.accounting.tokens(),
            "model call"
        );
        Ok(completion.text)
    }

    /// Call the model and decode a JSON object out of its reply.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<T, ModelCallError> {
        let text = self.complete(system_prompt, user_text).await?;
        decode_model_json(&text).map_err(|e| {
            tracing::debug!(error = %e, raw = %text, "undecodable model output");
            ModelCallError::Decode(e)
        })
    }
}

/// A model call that either failed outright or returned unusable text.
#[derive(Debug, thiserror::Error)]
pub enum ModelCallError {
    #[error(transparent)]
    Completion(#[from] LLMError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockCompletion;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Clue {
        new_clue: String,
    }

    #[tokio::test]
    async fn test_tokens_are_added_once_per_call() {
        let accounting = Arc::new(Accounting::new());
        let model = MeteredModel::new(
            Arc::new(MockCompletion::always("{\"new_clue\": \"x\"}", 17)),
            Arc::clone(&accounting),
        );
        model.complete("sys", "user").await.unwrap();
        let clue: Clue = model.complete_json("sys", "user").await.unwrap();
        assert_eq!(clue.new_clue, "x");
        assert_eq!(accounting.tokens(), 34);
        assert_eq!(accounting.calls(), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_still_costs_tokens() {
        let accounting = Arc::new(Accounting::new());
        let model = MeteredModel::new(
            Arc::new(MockCompletion::always("no json here", 9)),
            Arc::clone(&accounting),
        );
        let err = model.complete_json::<Clue>("sys", "user").await.unwrap_err();
        assert!(matches!(err, ModelCallError::Decode(DecodeError::NoJsonObject)));
        assert_eq!(accounting.tokens(), 9);
    }
}
