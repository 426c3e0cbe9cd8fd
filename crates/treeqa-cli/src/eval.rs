//! Scoring of result files.
//!
//! Answers are normalized (lowercase, no punctuation, no articles, single
//! spaces) before comparison. The headline score is exact-match-contains:
//! the prediction contains some gold answer or one of its aliases.

use crate::record::ResultRecord;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

/// Gold answer → alternative spellings.
pub type Aliases = HashMap<String, Vec<String>>;

pub fn load_aliases(path: &Path) -> Result<Aliases> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read aliases {}", path.display()))?;
    let aliases: Aliases = serde_json::from_str(&text)
        .with_context(|| format!("aliases {} must map answers to lists", path.display()))?;
    tracing::info!(path = %path.display(), entries = aliases.len(), "loaded aliases");
    Ok(aliases)
}

pub fn normalize(s: &str) -> String {
    static ARTICLES: OnceLock<Regex> = OnceLock::new();
    let articles = ARTICLES.get_or_init(|| Regex::new(r"\b(a|an|the)\b").expect("static regex"));

    let lowered: String = s
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    articles
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prediction equals some gold answer after normalization.
pub fn exact_match(prediction: &str, gold: &[String]) -> bool {
    if gold.is_empty() {
        return prediction.trim().is_empty();
    }
    let p = normalize(prediction);
    !p.is_empty() && gold.iter().any(|g| normalize(g) == p)
}

/// Prediction contains some non-empty gold answer after normalization.
pub fn contains_match(prediction: &str, gold: &[String]) -> bool {
    let p = normalize(prediction);
    if p.is_empty() {
        return false;
    }
    gold.iter()
        .map(|g| normalize(g))
        .any(|g| !g.is_empty() && p.contains(&g))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenScore {
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Best token-level F1 over the gold answers.
pub fn token_f1(prediction: &str, gold: &[String]) -> TokenScore {
    let p = normalize(prediction);
    let predicted = bag(&p);
    let predicted_total: usize = predicted.values().sum();
    if predicted_total == 0 {
        return TokenScore::default();
    }

    let mut best = TokenScore::default();
    for g in gold {
        let g = normalize(g);
        let expected = bag(&g);
        let expected_total: usize = expected.values().sum();
        if expected_total == 0 {
            continue;
        }
        let common: usize = predicted
            .iter()
            .map(|(token, n)| (*n).min(expected.get(token).copied().unwrap_or(0)))
            .sum();
        if common == 0 {
            continue;
        }
        let precision = common as f64 / predicted_total as f64;
        let recall = common as f64 / expected_total as f64;
        let f1 = 2.0 * precision * recall / (precision + recall);
        if f1 > best.f1 {
            best = TokenScore { f1, precision, recall };
        }
    }
    best
}

fn bag(text: &str) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for token in text.split_whitespace() {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

/// Gold answers plus their aliases, deduplicated.
pub fn expand(gold: &[String], aliases: Option<&Aliases>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for answer in gold {
        let extra = aliases.and_then(|a| a.get(answer)).into_iter().flatten();
        for candidate in std::iter::once(answer).chain(extra) {
            if seen.insert(candidate.clone()) {
                out.push(candidate.clone());
            }
        }
    }
    out
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub records: usize,
    pub failed: usize,
    pub exact_match: f64,
    pub contains_match: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub avg_logic_init_time: f64,
    pub avg_self_adaptive_time: f64,
    pub avg_final_reasoning_time: f64,
    pub avg_total_processing_time: f64,
    pub avg_logic_init_tokens: f64,
    pub avg_self_adaptive_tokens: f64,
    pub avg_final_reasoning_tokens: f64,
    pub avg_total_tokens: f64,
    /// Over completed records only.
    pub avg_fix_count: f64,
}

/// A record that missed under exact-match-contains.
#[derive(Debug, Clone, Serialize)]
pub struct Miss {
    pub id: String,
    pub question: String,
    pub answers: Vec<String>,
    pub predicted_answer: String,
    pub f1: f64,
    pub fix_count: Option<u64>,
}

pub fn evaluate(records: &[ResultRecord], aliases: Option<&Aliases>) -> Result<(EvalReport, Vec<Miss>)> {
    if records.is_empty() {
        bail!("no records to evaluate");
    }

    let n = records.len() as f64;
    let mut report = EvalReport {
        records: records.len(),
        ..EvalReport::default()
    };
    let mut misses = Vec::new();
    let mut fixes = 0u64;
    let mut completed = 0usize;

    for record in records {
        let prediction = record.final_answer.as_deref().unwrap_or_default();
        let gold = expand(&record.original_answer, aliases);
        let score = token_f1(prediction, &gold);
        let hit = contains_match(prediction, &gold);

        report.exact_match += f64::from(u8::from(exact_match(prediction, &gold)));
        report.contains_match += f64::from(u8::from(hit));
        report.f1 += score.f1;
        report.precision += score.precision;
        report.recall += score.recall;

        let m = &record.metrics;
        report.avg_logic_init_time += m.logic_init_time;
        report.avg_self_adaptive_time += m.self_adaptive_time;
        report.avg_final_reasoning_time += m.final_reasoning_time;
        report.avg_total_processing_time += m.total_processing_time;
        report.avg_logic_init_tokens += m.logic_init_tokens as f64;
        report.avg_self_adaptive_tokens += m.self_adaptive_tokens as f64;
        report.avg_final_reasoning_tokens += m.final_reasoning_tokens as f64;
        report.avg_total_tokens += m.total_tokens as f64;

        match record.fix_count {
            Some(f) => {
                fixes += f;
                completed += 1;
            }
            None => report.failed += 1,
        }

        if !hit {
            misses.push(Miss {
                id: record.id.clone(),
                question: record.question.clone(),
                answers: gold,
                predicted_answer: prediction.to_string(),
                f1: score.f1,
                fix_count: record.fix_count,
            });
        }
    }

    for v in [
        &mut report.exact_match,
        &mut report.contains_match,
        &mut report.f1,
        &mut report.precision,
        &mut report.recall,
        &mut report.avg_logic_init_time,
        &mut report.avg_self_adaptive_time,
        &mut report.avg_final_reasoning_time,
        &mut report.avg_total_processing_time,
        &mut report.avg_logic_init_tokens,
        &mut report.avg_self_adaptive_tokens,
        &mut report.avg_final_reasoning_tokens,
        &mut report.avg_total_tokens,
    ] {
        *v /= n;
    }
    if completed > 0 {
        report.avg_fix_count = fixes as f64 / completed as f64;
    }

    Ok((report, misses))
}
