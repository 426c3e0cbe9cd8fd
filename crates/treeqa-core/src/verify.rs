//! Node verification state machine.
//!
//! ```text
//!  Gathering ─► Judging ─┬─ isTrue truthy ────────────────► Accepted (refs attached)
//!                        ├─ isTrue false ─► repair ───────► Rejected (refs attached)
//!                        ├─ "unknown" + insufficient ─► new clue ─► Gathering (same box)
//!                        │                                  └─► Judging (once more, no further escalation)
//!                        └─ undecodable ─────────────────► Skipped (node untouched)
//! ```
//!
//! `"unknown"` counts as truthy: an unknown verdict with sufficient evidence,
//! or one still unknown after escalation, is accepted with its references.

use crate::config::EvidenceLimits;
use crate::evidence::EvidenceBox;
use crate::gather::QueryInfoGatherer;
use crate::llm::{MeteredModel, ModelCallError};
use crate::prompts;
use crate::repair::SubtreeRepairer;
use crate::tree::{LogicTree, NodePath, References, SOURCE_WIKIPEDIA};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;

// ============================================================================
// Judgment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    True,
    False,
    Unknown,
}

impl Verdict {
    pub fn is_truthy(self) -> bool {
        !matches!(self, Verdict::False)
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Bool(true) => Ok(Verdict::True),
            serde_json::Value::Bool(false) => Ok(Verdict::False),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Verdict::True),
                "false" => Ok(Verdict::False),
                "unknown" => Ok(Verdict::Unknown),
                other => Err(D::Error::custom(format!("unrecognized verdict {other:?}"))),
            },
            other => Err(D::Error::custom(format!("unrecognized verdict {other}"))),
        }
    }
}

/// The model's structured judgment of one hypothesis.
#[derive(Debug, Clone, Deserialize)]
pub struct Judgment {
    #[serde(rename = "isTrue", alias = "is_true")]
    pub verdict: Verdict,
    #[serde(default = "sufficient_by_default", deserialize_with = "lenient_bool")]
    pub fact_sufficient: bool,
    #[serde(default, deserialize_with = "lenient_reason")]
    pub reason: Option<String>,
    #[serde(rename = "ref", default, deserialize_with = "lenient_refs")]
    pub refs: References,
}

impl Judgment {
    pub fn needs_escalation(&self) -> bool {
        self.verdict == Verdict::Unknown && !self.fact_sufficient
    }
}

fn sufficient_by_default() -> bool {
    true
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(D::Error::custom(format!("expected boolean, found {other:?}"))),
        },
        serde_json::Value::Null => Ok(true),
        other => Err(D::Error::custom(format!("expected boolean, found {other}"))),
    }
}

fn lenient_reason<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// `ref` is either a map of source to id list or a placeholder string.
fn lenient_refs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<References, D::Error> {
    let mut refs = References::new();
    if let serde_json::Value::Object(map) = serde_json::Value::deserialize(deserializer)? {
        for (kind, items) in map {
            let list: Vec<String> = match items {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect(),
                serde_json::Value::String(s) => vec![s],
                _ => Vec::new(),
            };
            let list: Vec<String> = list.into_iter().filter(|s| !s.trim().is_empty()).collect();
            if !list.is_empty() {
                refs.insert(kind, list);
            }
        }
    }
    Ok(refs)
}

#[derive(Debug, Deserialize)]
struct NewClue {
    new_clue: String,
}

// ============================================================================
// Verifier
// ============================================================================

/// How one node's verification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(Verdict),
    Rejected { repaired: bool },
    /// Judgment unusable; node left unmodified.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub outcome: Outcome,
    pub escalated: bool,
}

#[derive(Clone)]
pub struct NodeVerifier {
    model: MeteredModel,
    gatherer: QueryInfoGatherer,
    repairer: SubtreeRepairer,
    limits: EvidenceLimits,
}

impl NodeVerifier {
    pub fn new(
        model: MeteredModel,
        gatherer: QueryInfoGatherer,
        repairer: SubtreeRepairer,
        limits: EvidenceLimits,
    ) -> Self {
        Self {
            model,
            gatherer,
            repairer,
            limits,
        }
    }

    /// Verify the node at `path`, repairing its subtree when refuted.
    ///
    /// The node is looked up again after every model call; nothing borrowed
    /// from the tree lives across an await.
    pub async fn refine_subtree(&self, tree: &mut LogicTree, path: &NodePath) -> Verification {
        let skipped = Verification {
            outcome: Outcome::Skipped,
            escalated: false,
        };
        let Some((sub_question, hypothesis)) = tree.node(path).and_then(|n| {
            Some((n.sub_question.clone()?, n.hypothesis_answer.clone()?))
        }) else {
            tracing::warn!(path = %path, "no verifiable node at path");
            return skipped;
        };

        // Gathering
        let evidence = Arc::new(EvidenceBox::new(self.limits));
        let probe = format!("{sub_question} {hypothesis}");
        self.gatherer.gather(&probe, &evidence).await;

        // Judging
        let mut judgment = match self.judge(&sub_question, &hypothesis, &evidence).await {
            Some(j) => j,
            None => return skipped,
        };

        let mut escalated = false;
        if judgment.needs_escalation() {
            escalated = true;
            match self.escalate(&sub_question, &hypothesis, &evidence).await {
                Some(rejudged) => judgment = rejudged,
                None => {
                    return Verification {
                        outcome: Outcome::Skipped,
                        escalated,
                    }
                }
            }
        }

        let outcome = if judgment.verdict.is_truthy() {
            tracing::info!(path = %path, verdict = ?judgment.verdict, "evidence supports node");
            Outcome::Accepted(judgment.verdict)
        } else {
            let reason = judgment.reason.as_deref().unwrap_or("hypothesis contradicted by evidence");
            tracing::info!(path = %path, reason, "conflict found");
            tree.accounting().record_fix();
            let repaired = self.repairer.repair(tree, path, reason).await;
            Outcome::Rejected { repaired }
        };

        let refs = resolve_references(&judgment.refs, &evidence);
        if let Some(node) = tree.node_mut(path) {
            node.merge_refs(&refs);
        }

        Verification { outcome, escalated }
    }

    async fn judge(
        &self,
        sub_question: &str,
        hypothesis: &str,
        evidence: &EvidenceBox,
    ) -> Option<Judgment> {
        let prompt = prompts::fact_check(sub_question, hypothesis, &evidence.render());
        match self.model.complete_json::<Judgment>(&prompt.system, &prompt.user).await {
            Ok(j) => {
                tracing::debug!(verdict = ?j.verdict, sufficient = j.fact_sufficient, "judged");
                Some(j)
            }
            Err(e) => {
                log_unusable("judgment", &e);
                None
            }
        }
    }

    /// One alternate probe, gathered into the same box, then one re-judge.
    async fn escalate(
        &self,
        sub_question: &str,
        hypothesis: &str,
        evidence: &Arc<EvidenceBox>,
    ) -> Option<Judgment> {
        let prompt = prompts::new_clue(sub_question, &evidence.render());
        match self.model.complete_json::<NewClue>(&prompt.system, &prompt.user).await {
            Ok(clue) => {
                tracing::info!(clue = %clue.new_clue, "insufficient evidence, gathering with new clue");
                self.gatherer.gather(&clue.new_clue, evidence).await;
            }
            Err(e) => log_unusable("new clue", &e),
        }
        self.judge(sub_question, hypothesis, evidence).await
    }
}

fn log_unusable(what: &str, err: &ModelCallError) {
    tracing::warn!(error = %err, "{what} unusable, continuing with next node");
}

/// Expand cited passage ids to `"<id>||<content>"`. When none of the cited
/// ids are in the box the raw ids are kept.
fn resolve_references(refs: &References, evidence: &EvidenceBox) -> References {
    let mut out = refs.clone();
    if let Some(ids) = refs.get(SOURCE_WIKIPEDIA) {
        let resolved: Vec<String> = ids
            .iter()
            .filter_map(|id| {
                evidence
                    .passage(id)
                    .map(|p| format!("{}||{}", p.id, p.content))
            })
            .collect();
        if !resolved.is_empty() {
            out.insert(SOURCE_WIKIPEDIA.to_string(), resolved);
        }
    }
    out
}
