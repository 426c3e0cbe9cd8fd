//! Subtree regeneration after a rejected hypothesis.

use crate::decode::decode_model_json;
use crate::error::DecodeError;
use crate::llm::MeteredModel;
use crate::prompts;
use crate::tree::{LogicTree, Node, NodePath};

/// Why a repair left the tree untouched.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("no node at path {0}")]
    MissingNode(NodePath),
    #[error("repair call failed: {0}")]
    Completion(#[from] crate::error::LLMError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Clone)]
pub struct SubtreeRepairer {
    model: MeteredModel,
}

impl SubtreeRepairer {
    pub fn new(model: MeteredModel) -> Self {
        Self { model }
    }

    /// Regenerate the subtree at `path` and swap it in.
    ///
    /// The node's own references stay. On any failure the old subtree is kept
    /// and the error is logged; the caller only learns whether it was replaced.
    pub async fn repair(&self, tree: &mut LogicTree, path: &NodePath, reason: &str) -> bool {
        match self.try_repair(tree, path, reason).await {
            Ok(()) => {
                tracing::info!(path = %path, "subtree repaired");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "repair failed, keeping old subtree");
                false
            }
        }
    }

    async fn try_repair(
        &self,
        tree: &mut LogicTree,
        path: &NodePath,
        reason: &str,
    ) -> Result<(), RepairError> {
        let current = tree
            .node(path)
            .cloned()
            .ok_or_else(|| RepairError::MissingNode(path.clone()))?;
        let subtree_json = serde_json::to_string(&current).unwrap_or_default();
        let prompt = prompts::subtree_repair(&subtree_json, reason, tree.input_question());

        let text = self.model.complete(&prompt.system, &prompt.user).await?;
        let replacement = decode_replacement(&text)?;
        check_structure(&current, &replacement)?;

        let node = tree
            .node_mut(path)
            .ok_or_else(|| RepairError::MissingNode(path.clone()))?;
        node.sub_question = replacement.sub_question;
        node.hypothesis_answer = replacement.hypothesis_answer;
        node.children = replacement.children;
        Ok(())
    }
}

/// Accepts a bare node or one wrapped under `logic_tree`/`subtree`/`node`.
fn decode_replacement(text: &str) -> Result<Node, DecodeError> {
    let value: serde_json::Value = decode_model_json(text)?;
    let inner = if value.get("sub_question").is_some() {
        value
    } else {
        ["logic_tree", "subtree", "node"]
            .iter()
            .find_map(|key| value.get(*key).filter(|v| v.is_object()).cloned())
            .unwrap_or(value)
    };
    let mut node: Node = serde_json::from_value(inner).map_err(DecodeError::Schema)?;
    for child in &mut node.children {
        clear_refs(child);
    }
    Ok(node)
}

// Children of a fresh subtree have not been verified yet.
fn clear_refs(node: &mut Node) {
    node.refs = None;
    for child in &mut node.children {
        clear_refs(child);
    }
}

fn check_structure(current: &Node, replacement: &Node) -> Result<(), DecodeError> {
    if !replacement.is_question() {
        return Err(DecodeError::Structure(
            "replacement lacks sub_question or hypothesis_answer".to_string(),
        ));
    }
    if replacement.children.len() != current.children.len() {
        return Err(DecodeError::Structure(format!(
            "replacement has {} children, expected {}",
            replacement.children.len(),
            current.children.len()
        )));
    }
    if replacement.height() > current.height() {
        return Err(DecodeError::Structure(format!(
            "replacement adds depth ({} > {})",
            replacement.height(),
            current.height()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::Accounting;
    use crate::prompts::PromptKind;
    use crate::providers::ScriptedCompletion;
    use crate::tree::{References, SOURCE_WIKIDATA};
    use std::sync::Arc;

    fn tree() -> LogicTree {
        let mut wrong = Node::question(
            "Who composed Manru?",
            "Frédéric Chopin",
            vec![Node::question("When was Manru written?", "1830", vec![])],
        );
        let mut refs = References::new();
        refs.insert(SOURCE_WIKIDATA.into(), vec!["Manru-composer-Paderewski".into()]);
        wrong.merge_refs(&refs);
        LogicTree::new(
            "Who composed the music for Manru?",
            Node::root(vec![wrong, Node::question("Sibling?", "Untouched", vec![])]),
            Arc::new(Accounting::new()),
        )
    }

    fn repairer(reply: &str) -> SubtreeRepairer {
        SubtreeRepairer::new(MeteredModel::new(
            Arc::new(ScriptedCompletion::new().on(PromptKind::SubtreeRepair, reply)),
            Arc::new(Accounting::new()),
        ))
    }

    #[tokio::test]
    async fn test_replaces_in_place_and_keeps_refs() {
        let mut t = tree();
        let sibling_before = t.root.children[1].clone();
        let reply = r#"```json
{"sub_question": "Who composed Manru?", "hypothesis_answer": "Ignacy Jan Paderewski",
 "children": [{"sub_question": "When was Manru written?", "hypothesis_answer": "1892-1901", "ref": {"wikidata": ["bogus"]}}]}
```"#;
        assert!(repairer(reply).repair(&mut t, &NodePath::from(vec![0]), "wrong composer name").await);

        let node = &t.root.children[0];
        assert_eq!(node.hypothesis_answer.as_deref(), Some("Ignacy Jan Paderewski"));
        assert!(node.refs.is_some());
        assert!(node.children[0].refs.is_none());
        assert_eq!(t.root.children[1], sibling_before);
    }

    #[tokio::test]
    async fn test_wrapped_reply_is_accepted() {
        let mut t = tree();
        let reply = r#"{"logic_tree": {"sub_question": "Who composed Manru?", "hypothesis_answer": "Paderewski",
            "children": [{"sub_question": "When?", "hypothesis_answer": "1901"}]}}"#;
        assert!(repairer(reply).repair(&mut t, &NodePath::from(vec![0]), "r").await);
        assert_eq!(t.root.children[0].hypothesis_answer.as_deref(), Some("Paderewski"));
    }

    #[tokio::test]
    async fn test_changed_branching_is_rejected() {
        let mut t = tree();
        let before = t.root.clone();
        let reply = r#"{"sub_question": "q", "hypothesis_answer": "a", "children": []}"#;
        assert!(!repairer(reply).repair(&mut t, &NodePath::from(vec![0]), "r").await);
        assert_eq!(t.root, before);
    }

    #[tokio::test]
    async fn test_added_depth_is_rejected() {
        let mut t = tree();
        let before = t.root.clone();
        let reply = r#"{"sub_question": "q", "hypothesis_answer": "a", "children": [
            {"sub_question": "q1", "hypothesis_answer": "a1", "children": [{"sub_question": "q2", "hypothesis_answer": "a2"}]}]}"#;
        assert!(!repairer(reply).repair(&mut t, &NodePath::from(vec![0]), "r").await);
        assert_eq!(t.root, before);
    }

    #[tokio::test]
    async fn test_garbage_reply_keeps_old_subtree() {
        let mut t = tree();
        let before = t.root.clone();
        assert!(!repairer("I could not fix it").repair(&mut t, &NodePath::from(vec![0]), "r").await);
        assert_eq!(t.root, before);
    }
}
