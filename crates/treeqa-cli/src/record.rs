//! One JSONL line per answered question.

use crate::dataset::DatasetItem;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;
use treeqa_core::{EpisodeMetrics, EpisodeReport, EpisodeStatus, TreeRecord, WalkSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub original_answer: Vec<String>,
    pub status: EpisodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
    /// Absent for failed episodes.
    #[serde(default)]
    pub fix_count: Option<u64>,
    #[serde(default)]
    pub processed_answer: Option<TreeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walk: Option<WalkSummary>,
    #[serde(flatten)]
    pub metrics: EpisodeMetrics,
}

impl ResultRecord {
    pub fn new(item: DatasetItem, report: EpisodeReport) -> Self {
        Self {
            id: item.id,
            question: item.question,
            original_answer: item.answers,
            status: report.status,
            error: report.error,
            final_answer: report.final_answer,
            fix_count: report.fix_count,
            processed_answer: report.tree,
            walk: report.walk,
            metrics: report.metrics,
        }
    }
}

/// Ids already written to `path`. A missing file means none.
pub fn processed_ids(path: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    if !path.exists() {
        return Ok(ids);
    }
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(value) => {
                if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                    ids.insert(id.to_string());
                }
            }
            Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping invalid JSON line"),
        }
    }
    Ok(ids)
}

/// Every well-formed record in `path`; malformed lines are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<ResultRecord>> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ResultRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed record"),
        }
    }
    Ok(records)
}
