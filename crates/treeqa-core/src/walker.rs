//! Self-adaptive refinement pass over the whole tree.

use crate::tree::{LogicTree, NodePath};
use crate::verify::{NodeVerifier, Outcome};
use serde::{Deserialize, Serialize};

/// Per-pass tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkSummary {
    pub visited: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub repaired: usize,
    pub skipped: usize,
    pub escalated: usize,
}

#[derive(Clone)]
pub struct TreeWalker {
    verifier: NodeVerifier,
}

impl TreeWalker {
    pub fn new(verifier: NodeVerifier) -> Self {
        Self { verifier }
    }

    /// Pre-order walk: a node is refined before its children, children in
    /// their current order. Child paths are read from the tree after the
    /// parent's visit, so a repaired subtree is walked in its new form and
    /// every node is visited once.
    pub async fn refine_all(&self, tree: &mut LogicTree) -> WalkSummary {
        let mut summary = WalkSummary::default();
        let mut stack = vec![NodePath::root()];

        while let Some(path) = stack.pop() {
            let is_question = match tree.node(&path) {
                Some(node) => node.is_question(),
                None => continue,
            };

            if is_question {
                tracing::debug!(path = %path, "checking node");
                let result = self.verifier.refine_subtree(tree, &path).await;
                summary.visited += 1;
                summary.escalated += usize::from(result.escalated);
                match result.outcome {
                    Outcome::Accepted(_) => summary.accepted += 1,
                    Outcome::Rejected { repaired } => {
                        summary.rejected += 1;
                        summary.repaired += usize::from(repaired);
                    }
                    Outcome::Skipped => summary.skipped += 1,
                }
            }

            if let Some(node) = tree.node(&path) {
                for i in (0..node.children.len()).rev() {
                    stack.push(path.child(i));
                }
            }
        }

        tracing::info!(
            visited = summary.visited,
            rejected = summary.rejected,
            repaired = summary.repaired,
            skipped = summary.skipped,
            "refinement pass complete"
        );
        summary
    }
}
