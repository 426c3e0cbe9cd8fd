//! Final answer synthesis.

use crate::error::{EngineError, Stage};
use crate::llm::MeteredModel;
use crate::prompts;
use crate::tree::LogicTree;

#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: MeteredModel,
}

impl AnswerSynthesizer {
    pub fn new(model: MeteredModel) -> Self {
        Self { model }
    }

    /// One call over the refined tree; no retry.
    pub async fn synthesize(&self, tree: &mut LogicTree) -> Result<String, EngineError> {
        let tree_json = serde_json::to_string(&tree.root).unwrap_or_default();
        let prompt = prompts::final_answer(tree.input_question(), &tree_json);
        let answer = self
            .model
            .complete(&prompt.system, &prompt.user)
            .await
            .map_err(|e| EngineError::completion(Stage::Synthesis, e))?;
        let answer = answer.trim().to_string();
        tracing::info!(answer = %answer, "final answer");
        tree.set_final_answer(answer.clone());
        Ok(answer)
    }
}
