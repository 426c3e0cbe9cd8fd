//! Benchmark dataset loaders.
//!
//! Each format stores id, question and gold answers differently; all of them
//! come out as [`DatasetItem`]. Items without an id or question are skipped.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetFormat {
    /// 2WikiMultihopQA: `_id`, `question`, `answer`
    #[value(name = "2wiki")]
    TwoWiki,
    /// WebQSP: `QuestionId`, `ProcessedQuestion`, `Parses[0].Answers`
    #[value(name = "webqsp")]
    WebQsp,
    /// Adversarial HotpotQA: `qas_id`, `question`, `answer`
    #[value(name = "advhotpotqa")]
    AdvHotpotQa,
    /// QALD-10 English: positional id, `question[lang=en].string`, `answer` values
    #[value(name = "qald-en")]
    QaldEn,
    /// MuSiQue: `id`, `question`, `answer` + `answer_aliases`
    #[value(name = "musique")]
    Musique,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetItem {
    pub id: String,
    pub question: String,
    pub answers: Vec<String>,
}

/// Load every usable item from a dataset file.
pub fn load(path: &Path, format: DatasetFormat) -> Result<Vec<DatasetItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    let raw: Value = serde_json::from_str(&text)
        .with_context(|| format!("dataset {} is not JSON", path.display()))?;
    parse(raw, format)
}

pub fn parse(raw: Value, format: DatasetFormat) -> Result<Vec<DatasetItem>> {
    let entries = match raw {
        Value::Object(mut map) if format == DatasetFormat::WebQsp => match map.remove("Questions") {
            Some(Value::Array(entries)) => entries,
            _ => bail!("WebQSP file has no Questions list"),
        },
        Value::Array(entries) => entries,
        other => bail!("expected a list of questions, got {}", kind(&other)),
    };

    let total = entries.len();
    let items: Vec<DatasetItem> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| extract(entry, index, format))
        .collect();
    if items.len() < total {
        tracing::warn!(skipped = total - items.len(), "dataset entries without id or question");
    }
    Ok(items)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Drop empties and duplicates, keeping first-seen order.
fn answers(values: impl IntoIterator<Item = Option<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .flatten()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

fn answer_field(value: &Value) -> Vec<String> {
    match value {
        Value::Array(list) => answers(list.iter().map(text)),
        other => answers([text(other)]),
    }
}

pub fn extract(entry: &Value, index: usize, format: DatasetFormat) -> Option<DatasetItem> {
    let (id, question, gold) = match format {
        DatasetFormat::TwoWiki => (
            text(&entry["_id"])?,
            text(&entry["question"])?,
            answer_field(&entry["answer"]),
        ),
        DatasetFormat::AdvHotpotQa => (
            text(&entry["qas_id"])?,
            text(&entry["question"])?,
            answer_field(&entry["answer"]),
        ),
        DatasetFormat::WebQsp => {
            let question = text(&entry["ProcessedQuestion"]).or_else(|| text(&entry["RawQuestion"]))?;
            let gold = entry["Parses"][0]["Answers"]
                .as_array()
                .map(|list| {
                    answers(
                        list.iter()
                            .map(|a| text(&a["EntityName"]).or_else(|| text(&a["AnswerArgument"]))),
                    )
                })
                .unwrap_or_default();
            (text(&entry["QuestionId"])?, question, gold)
        }
        DatasetFormat::QaldEn => {
            let question = match &entry["question"] {
                Value::Array(list) => list
                    .iter()
                    .find(|q| q["language"] == "en")
                    .and_then(|q| text(&q["string"])),
                other => text(other),
            }?;
            let gold = match &entry["answer"] {
                Value::Object(map) => answers(map.values().map(text)),
                other => answer_field(other),
            };
            (format!("qald_index_{index}"), question, gold)
        }
        DatasetFormat::Musique => {
            let mut all = vec![text(&entry["answer"])];
            if let Some(aliases) = entry["answer_aliases"].as_array() {
                all.extend(aliases.iter().map(text));
            }
            (text(&entry["id"])?, text(&entry["question"])?, answers(all))
        }
    };

    Some(DatasetItem {
        id,
        question,
        answers: gold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_two_wiki() {
        let items = parse(
            json!([
                {"_id": "a1", "question": "Who composed Manru?", "answer": "Ignacy Jan Paderewski"},
                {"_id": "a2", "answer": "no question"}
            ]),
            DatasetFormat::TwoWiki,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].answers, vec!["Ignacy Jan Paderewski"]);
    }

    #[test]
    fn test_webqsp_falls_back_to_raw_question_and_argument() {
        let items = parse(
            json!({"Questions": [{
                "QuestionId": "WebQTest-0",
                "RawQuestion": "what does jamaican people speak?",
                "Parses": [{"Answers": [
                    {"AnswerArgument": "m.01428y", "EntityName": "Jamaican English"},
                    {"AnswerArgument": "m.04ygk0"}
                ]}]
            }]}),
            DatasetFormat::WebQsp,
        )
        .unwrap();
        assert_eq!(items[0].question, "what does jamaican people speak?");
        assert_eq!(items[0].answers, vec!["Jamaican English", "m.04ygk0"]);
    }

    #[test]
    fn test_webqsp_requires_questions_list() {
        assert!(parse(json!({"Version": "1.0"}), DatasetFormat::WebQsp).is_err());
        assert!(parse(json!({"Questions": []}), DatasetFormat::TwoWiki).is_err());
    }

    #[test]
    fn test_qald_english_question_and_positional_id() {
        let items = parse(
            json!([
                {"question": [{"language": "de", "string": "Nur Deutsch"}], "answer": {}},
                {
                    "question": [
                        {"language": "de", "string": "Wo wurde Paderewski geboren?"},
                        {"language": "en", "string": "Where was Paderewski born?"}
                    ],
                    "answer": {"0": "Kuryłówka", "1": "Kuryłówka", "2": ""}
                }
            ]),
            DatasetFormat::QaldEn,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "qald_index_1");
        assert_eq!(items[0].question, "Where was Paderewski born?");
        assert_eq!(items[0].answers, vec!["Kuryłówka"]);
    }

    #[test]
    fn test_musique_merges_aliases() {
        let items = parse(
            json!([{"id": "2hop_1", "question": "q", "answer": "USA",
                    "answer_aliases": ["United States", "USA", ""]}]),
            DatasetFormat::Musique,
        )
        .unwrap();
        assert_eq!(items[0].answers, vec!["USA", "United States"]);
    }

    #[test]
    fn test_advhotpot_numeric_answer() {
        let item = extract(
            &json!({"qas_id": "h1", "question": "How many acts?", "answer": 3}),
            0,
            DatasetFormat::AdvHotpotQa,
        )
        .unwrap();
        assert_eq!(item.answers, vec!["3"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.json");
        std::fs::write(&path, r#"[{"_id": "x", "question": "q?", "answer": "a"}]"#).unwrap();
        assert_eq!(load(&path, DatasetFormat::TwoWiki).unwrap().len(), 1);
        assert!(load(&dir.path().join("missing.json"), DatasetFormat::TwoWiki).is_err());
    }
}
