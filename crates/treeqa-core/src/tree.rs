//! Logic tree data model.
//!
//! A [`LogicTree`] owns a root [`Node`]; every node owns its children. The root
//! is a sentinel without question/hypothesis. Nodes are addressed by a
//! [`NodePath`] of child indices that is resolved against the current tree
//! shape each time it is used, so no reference into the tree is ever held
//! across a model call.

use crate::accounting::Accounting;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Reference source for Wikipedia passages (`"<id>||<content>"` once resolved).
pub const SOURCE_WIKIPEDIA: &str = "wikipedia";
/// Reference source for Wikidata triples (`head-relation-tail`).
pub const SOURCE_WIKIDATA: &str = "wikidata";

/// Source kind -> ordered reference strings.
pub type References = BTreeMap<String, Vec<String>>;

// ============================================================================
// Node
// ============================================================================

/// One step of the decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub sub_question: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub hypothesis_answer: Option<String>,
    #[serde(default)]
    pub children: Vec<Node>,
    /// Evidence references attached by verification. Only ever grows.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<References>,
}

impl Node {
    /// Root sentinel.
    pub fn root(children: Vec<Node>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn question(
        sub_question: impl Into<String>,
        hypothesis_answer: impl Into<String>,
        children: Vec<Node>,
    ) -> Self {
        Self {
            sub_question: Some(sub_question.into()),
            hypothesis_answer: Some(hypothesis_answer.into()),
            children,
            refs: None,
        }
    }

    /// Carries both a sub-question and a hypothesis, so it can be verified.
    pub fn is_question(&self) -> bool {
        self.sub_question.is_some() && self.hypothesis_answer.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Levels below this node (0 for a leaf).
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Question-bearing nodes in this subtree, this node included.
    pub fn question_count(&self) -> usize {
        let own = usize::from(self.is_question());
        own + self
            .children
            .iter()
            .map(Node::question_count)
            .sum::<usize>()
    }

    /// Merge references, appending only strings not already present.
    pub fn merge_refs(&mut self, incoming: &References) {
        let refs = self.refs.get_or_insert_with(References::new);
        for (kind, items) in incoming {
            let slot = refs.entry(kind.clone()).or_default();
            for item in items {
                if !slot.contains(item) {
                    slot.push(item.clone());
                }
            }
        }
    }

    /// Pre-order list of (path, node) pairs for this subtree rooted at `base`.
    pub fn walk_paths(&self, base: NodePath) -> Vec<(NodePath, &Node)> {
        let mut out = Vec::new();
        let mut stack = vec![(base, self)];
        while let Some((path, node)) = stack.pop() {
            for (i, child) in node.children.iter().enumerate().rev() {
                stack.push((path.child(i), child));
            }
            out.push((path, node));
        }
        out
    }
}

/// Accept strings, numbers and booleans where text is expected.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected text, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Child indices from the root down to a node. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for NodePath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, idx) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{idx}")?;
        }
        f.write_str("]")
    }
}

// ============================================================================
// LogicTree
// ============================================================================

/// The episode's root aggregate.
#[derive(Debug)]
pub struct LogicTree {
    input_question: String,
    pub root: Node,
    final_answer: Option<String>,
    accounting: Arc<Accounting>,
}

impl LogicTree {
    pub fn new(input_question: impl Into<String>, root: Node, accounting: Arc<Accounting>) -> Self {
        Self {
            input_question: input_question.into(),
            root,
            final_answer: None,
            accounting,
        }
    }

    pub fn input_question(&self) -> &str {
        &self.input_question
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    /// Set once by answer synthesis. Later calls are ignored.
    pub fn set_final_answer(&mut self, answer: String) -> bool {
        if self.final_answer.is_some() {
            tracing::warn!("final answer already set; keeping the first one");
            return false;
        }
        self.final_answer = Some(answer);
        true
    }

    pub fn accounting(&self) -> &Arc<Accounting> {
        &self.accounting
    }

    pub fn token_count(&self) -> u64 {
        self.accounting.tokens()
    }

    pub fn fix_count(&self) -> u64 {
        self.accounting.fixes()
    }

    /// Resolve a path against the current shape.
    pub fn node(&self, path: &NodePath) -> Option<&Node> {
        let mut node = &self.root;
        for &idx in path.indices() {
            node = node.children.get(idx)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for &idx in path.indices() {
            node = node.children.get_mut(idx)?;
        }
        Some(node)
    }

    /// (sub_question, hypothesis) pairs in pre-order.
    pub fn qa_pairs(&self) -> Vec<(String, String)> {
        self.root
            .walk_paths(NodePath::root())
            .into_iter()
            .filter_map(|(_, node)| {
                Some((
                    node.sub_question.clone()?,
                    node.hypothesis_answer.clone()?,
                ))
            })
            .collect()
    }

    pub fn question_count(&self) -> usize {
        self.root.question_count()
    }

    /// Serializable snapshot of the tree and its counters.
    pub fn to_record(&self) -> TreeRecord {
        TreeRecord {
            input_question: self.input_question.clone(),
            logic_tree: self.root.clone(),
            answer: self.final_answer.clone(),
            fix_count: self.fix_count(),
            token_count: self.token_count(),
        }
    }

    /// Markdown outline of the tree with its references.
    pub fn to_markdown(&self) -> String {
        self.to_record().to_markdown()
    }
}

/// Stored form of a processed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub input_question: String,
    pub logic_tree: Node,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub fix_count: u64,
    #[serde(default)]
    pub token_count: u64,
}

impl TreeRecord {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("**Input Question:** {}\n", self.input_question),
            format!(
                "**Final Answer:** {}\n",
                self.answer.as_deref().unwrap_or("(none)")
            ),
        ];
        render_node(&self.logic_tree, 0, &mut lines);
        lines.join("\n")
    }
}

fn render_node(node: &Node, indent: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    if let (Some(q), Some(a)) = (&node.sub_question, &node.hypothesis_answer) {
        lines.push(format!("{pad}- Question: {q}"));
        lines.push(format!("{pad}  Answer: {a}"));
        if let Some(refs) = &node.refs {
            lines.push(format!("{pad}  References:"));
            for (kind, items) in refs {
                let label = match kind.as_str() {
                    SOURCE_WIKIPEDIA => "Wikipedia",
                    SOURCE_WIKIDATA => "Wikidata",
                    other => other,
                };
                for item in items {
                    lines.push(format!("{pad}    - {label}: {item}"));
                }
            }
        }
    }
    for child in &node.children {
        render_node(child, indent + 1, lines);
    }
}
