//! Dataset runs on a bounded worker pool.
//!
//! ```text
//! items ──► skip ids already in output ──► JoinSet (≤ workers in flight)
//!                                              │ Engine::answer per item
//!                                              ▼
//!                           append JSONL + flush, in completion order
//! ```
//!
//! Every question gets its own tree and accounting, so workers share nothing
//! but the engine's read-only collaborators.

use crate::dataset::DatasetItem;
use crate::record::{processed_ids, ResultRecord};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use treeqa_core::Engine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub submitted: usize,
    pub written: usize,
    pub failed: usize,
    /// Already in the output file, or repeated within the dataset.
    pub skipped: usize,
}

/// Items still to run, in dataset order.
pub fn pending(items: Vec<DatasetItem>, done: &HashSet<String>) -> (Vec<DatasetItem>, usize) {
    let mut seen = HashSet::new();
    let total = items.len();
    let todo: Vec<DatasetItem> = items
        .into_iter()
        .filter(|item| !done.contains(&item.id) && seen.insert(item.id.clone()))
        .collect();
    let skipped = total - todo.len();
    (todo, skipped)
}

pub async fn run_dataset(
    engine: Engine,
    items: Vec<DatasetItem>,
    output: &Path,
    workers: usize,
) -> Result<BatchSummary> {
    let done = processed_ids(output)?;
    let (todo, skipped) = pending(items, &done);
    let mut summary = BatchSummary {
        submitted: todo.len(),
        skipped,
        ..BatchSummary::default()
    };
    tracing::info!(
        pending = todo.len(),
        skipped,
        workers,
        output = %output.display(),
        "starting dataset run"
    );
    if todo.is_empty() {
        return Ok(summary);
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .with_context(|| format!("failed to open {}", output.display()))?;

    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for item in todo {
        let engine = engine.clone();
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let report = engine.answer(&item.question).await;
            ResultRecord::new(item, report)
        });
    }

    while let Some(joined) = set.join_next().await {
        let record = match joined {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "worker panicked");
                summary.failed += 1;
                continue;
            }
        };
        if record.error.is_some() {
            summary.failed += 1;
        }
        let line = serde_json::to_string(&record)?;
        writeln!(out, "{line}").with_context(|| format!("failed to write {}", output.display()))?;
        out.flush()?;
        summary.written += 1;
        tracing::info!(
            id = %record.id,
            done = summary.written,
            total = summary.submitted,
            fix_count = ?record.fix_count,
            tokens = record.metrics.total_tokens,
            "answered"
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::read_records;
    use treeqa_core::providers::{
        ScriptedCompletion, StaticCatalog, StaticLinker, StaticResolver, StaticRetriever,
    };
    use treeqa_core::{Collaborators, EngineConfig};

    fn engine() -> Engine {
        let sources = Collaborators {
            linker: Arc::new(StaticLinker::new()),
            resolver: Arc::new(StaticResolver::new()),
            catalog: Arc::new(StaticCatalog::new()),
            retriever: Arc::new(StaticRetriever::new()),
        };
        Engine::new(Arc::new(ScriptedCompletion::offline()), sources, EngineConfig::default())
    }

    fn item(id: &str) -> DatasetItem {
        DatasetItem {
            id: id.into(),
            question: format!("question {id}?"),
            answers: vec!["Unknown".into()],
        }
    }

    #[test]
    fn test_pending_skips_done_and_repeats() {
        let done: HashSet<String> = ["b".to_string()].into_iter().collect();
        let (todo, skipped) = pending(vec![item("a"), item("b"), item("a"), item("c")], &done);
        let ids: Vec<_> = todo.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_run_writes_one_line_per_item_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("results").join("out.jsonl");

        let first = run_dataset(engine(), vec![item("a"), item("b")], &output, 2)
            .await
            .unwrap();
        assert_eq!(first.written, 2);
        assert_eq!(first.failed, 0);

        let second = run_dataset(engine(), vec![item("a"), item("b"), item("c")], &output, 2)
            .await
            .unwrap();
        assert_eq!(second.skipped, 2);
        assert_eq!(second.written, 1);

        let records = read_records(&output).unwrap();
        let mut ids: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(records.iter().all(|r| r.fix_count == Some(0)));
        assert!(records.iter().all(|r| r.final_answer.as_deref() == Some("Mock answer")));
    }
}
