//! One question end to end: build, refine, synthesize.

use crate::accounting::{Accounting, AccountingSnapshot};
use crate::builder::TreeBuilder;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gather::{Collaborators, QueryInfoGatherer};
use crate::llm::{CompletionService, MeteredModel};
use crate::repair::SubtreeRepairer;
use crate::synthesize::AnswerSynthesizer;
use crate::tree::{LogicTree, TreeRecord};
use crate::verify::NodeVerifier;
use crate::walker::{TreeWalker, WalkSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Wall time (seconds) and token deltas per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub logic_init_time: f64,
    pub logic_init_tokens: u64,
    pub self_adaptive_time: f64,
    pub self_adaptive_tokens: u64,
    pub final_reasoning_time: f64,
    pub final_reasoning_tokens: u64,
    pub total_tokens: u64,
    pub total_processing_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Completed,
    Failed,
}

/// Result of one episode. A failed episode keeps whatever metrics exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub question: String,
    pub status: EpisodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
    /// Absent when the episode failed.
    #[serde(default)]
    pub fix_count: Option<u64>,
    #[serde(default)]
    pub tree: Option<TreeRecord>,
    #[serde(default)]
    pub walk: Option<WalkSummary>,
    pub metrics: EpisodeMetrics,
}

impl EpisodeReport {
    pub fn is_failed(&self) -> bool {
        self.status == EpisodeStatus::Failed
    }
}

/// Reasoning engine. Each call to [`Engine::answer`] gets its own tree and
/// accounting; the engine itself holds only shared, read-only collaborators.
#[derive(Clone)]
pub struct Engine {
    service: Arc<dyn CompletionService>,
    sources: Collaborators,
    config: Arc<EngineConfig>,
}

struct Components {
    builder: TreeBuilder,
    walker: TreeWalker,
    synthesizer: AnswerSynthesizer,
}

impl Engine {
    pub fn new(
        service: Arc<dyn CompletionService>,
        sources: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            sources,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn components(&self, accounting: Arc<Accounting>) -> Components {
        let model = MeteredModel::new(Arc::clone(&self.service), accounting);
        let gatherer =
            QueryInfoGatherer::new(model.clone(), self.sources.clone(), Arc::clone(&self.config));
        let repairer = SubtreeRepairer::new(model.clone());
        let verifier = NodeVerifier::new(model.clone(), gatherer, repairer, self.config.evidence);
        Components {
            builder: TreeBuilder::new(model.clone()),
            walker: TreeWalker::new(verifier),
            synthesizer: AnswerSynthesizer::new(model),
        }
    }

    /// Run one episode and return the refined tree on success.
    pub async fn run(&self, question: &str) -> Result<(LogicTree, WalkSummary, EpisodeMetrics), EngineError> {
        let mut metrics = EpisodeMetrics::default();
        let (tree, walk) = self
            .run_with(question, Arc::new(Accounting::new()), &mut metrics)
            .await?;
        Ok((tree, walk, metrics))
    }

    async fn run_with(
        &self,
        question: &str,
        accounting: Arc<Accounting>,
        metrics: &mut EpisodeMetrics,
    ) -> Result<(LogicTree, WalkSummary), EngineError> {
        let parts = self.components(Arc::clone(&accounting));
        let started = Instant::now();

        let mark = accounting.snapshot();
        let stage = Instant::now();
        let built = parts.builder.build(question).await;
        metrics.logic_init_time = stage.elapsed().as_secs_f64();
        metrics.logic_init_tokens = delta(&accounting, &mark);
        finish(metrics, &accounting, started);
        let mut tree = built?;

        let mark = accounting.snapshot();
        let stage = Instant::now();
        let walk = parts.walker.refine_all(&mut tree).await;
        metrics.self_adaptive_time = stage.elapsed().as_secs_f64();
        metrics.self_adaptive_tokens = delta(&accounting, &mark);
        finish(metrics, &accounting, started);

        let mark = accounting.snapshot();
        let stage = Instant::now();
        let synthesized = parts.synthesizer.synthesize(&mut tree).await;
        metrics.final_reasoning_time = stage.elapsed().as_secs_f64();
        metrics.final_reasoning_tokens = delta(&accounting, &mark);
        finish(metrics, &accounting, started);
        synthesized?;

        Ok((tree, walk))
    }

    /// Run one episode and fold the outcome into a report. Never fails.
    pub async fn answer(&self, question: &str) -> EpisodeReport {
        let mut metrics = EpisodeMetrics::default();
        match self
            .run_with(question, Arc::new(Accounting::new()), &mut metrics)
            .await
        {
            Ok((tree, walk)) => EpisodeReport {
                question: question.to_string(),
                status: EpisodeStatus::Completed,
                error: None,
                final_answer: tree.final_answer().map(str::to_string),
                fix_count: Some(tree.fix_count()),
                tree: Some(tree.to_record()),
                walk: Some(walk),
                metrics,
            },
            Err(e) => {
                tracing::error!(error = %e, question, "episode failed");
                EpisodeReport {
                    question: question.to_string(),
                    status: EpisodeStatus::Failed,
                    error: Some(e.to_string()),
                    final_answer: None,
                    fix_count: None,
                    tree: None,
                    walk: None,
                    metrics,
                }
            }
        }
    }
}

fn delta(accounting: &Accounting, mark: &AccountingSnapshot) -> u64 {
    accounting.snapshot().since(mark).tokens
}

fn finish(metrics: &mut EpisodeMetrics, accounting: &Accounting, started: Instant) {
    metrics.total_tokens = accounting.tokens();
    metrics.total_processing_time = started.elapsed().as_secs_f64();
}
