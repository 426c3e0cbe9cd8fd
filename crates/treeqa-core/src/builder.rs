//! Initial tree construction.

use crate::accounting::Accounting;
use crate::error::{EngineError, Stage};
use crate::llm::{MeteredModel, ModelCallError};
use crate::prompts;
use crate::tree::{LogicTree, Node};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ConstructedTree {
    logic_tree: Node,
    #[serde(default)]
    answer: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct TreeBuilder {
    model: MeteredModel,
}

impl TreeBuilder {
    pub fn new(model: MeteredModel) -> Self {
        Self { model }
    }

    /// One model call. Undecodable output is fatal for the question and is
    /// not retried.
    pub async fn build(&self, question: &str) -> Result<LogicTree, EngineError> {
        let accounting: Arc<Accounting> = Arc::clone(self.model.accounting());
        let before = accounting.tokens();
        let prompt = prompts::tree_construction(question);

        let constructed: ConstructedTree = self
            .model
            .complete_json(&prompt.system, &prompt.user)
            .await
            .map_err(|e| match e {
                ModelCallError::Completion(e) => EngineError::completion(Stage::Construction, e),
                ModelCallError::Decode(e) => EngineError::Construction(e),
            })?;

        let mut root = constructed.logic_tree;
        // The root is a sentinel even if the model labelled it.
        root.sub_question = None;
        root.hypothesis_answer = None;
        root.refs = None;

        tracing::info!(
            questions = root.question_count(),
            depth = root.height(),
            tokens = accounting.tokens() - before,
            "tree constructed"
        );
        if let Some(draft) = constructed.answer {
            tracing::debug!(%draft, "draft answer");
        }

        Ok(LogicTree::new(question, root, accounting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::prompts::PromptKind;
    use crate::providers::ScriptedCompletion;

    fn builder(reply: &str) -> TreeBuilder {
        TreeBuilder::new(MeteredModel::new(
            Arc::new(ScriptedCompletion::new().on(PromptKind::TreeConstruction, reply)),
            Arc::new(Accounting::new()),
        ))
    }

    #[tokio::test]
    async fn test_builds_from_chatty_output() {
        let reply = r#"Here is the tree:
```json
{"input_question": "model rewrote it", "logic_tree": {"children": [
  {"sub_question": "Who composed Manru?", "hypothesis_answer": "Paderewski", "children": [
     {"sub_question": "Is Manru an opera?", "hypothesis_answer": "Yes"}]}]},
 "answer": "Paderewski, born in Kuryłówka"}
```"#;
        let tree = builder(reply).build("Who composed Manru?").await.unwrap();
        assert_eq!(tree.input_question(), "Who composed Manru?");
        assert_eq!(tree.question_count(), 2);
        assert!(tree.final_answer().is_none());
        assert_eq!(tree.token_count(), 10);
    }

    #[tokio::test]
    async fn test_invalid_json_is_construction_error() {
        let err = builder("{not json}").build("q").await.unwrap_err();
        assert!(matches!(err, EngineError::Construction(DecodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_missing_logic_tree_is_schema_error() {
        let err = builder(r#"{"answer": "x"}"#).build("q").await.unwrap_err();
        assert!(matches!(err, EngineError::Construction(DecodeError::Schema(_))));
    }
}
