//! Reading structured values out of free-text model output.
//!
//! Models wrap JSON in prose or markdown fences. Every structured read goes
//! through the same two steps: cut the span from the first `{` to the last `}`,
//! then decode that span into a typed value. A span that is not JSON and JSON
//! that has the wrong shape are reported as different [`DecodeError`] kinds.

use crate::error::DecodeError;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

/// Strip markdown fences and return the outermost `{ ... }` span.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Decode a typed value from model output.
pub fn decode_model_json<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let cleaned = strip_fences(text);
    let span = extract_json_span(&cleaned).ok_or(DecodeError::NoJsonObject)?;
    let value: serde_json::Value = serde_json::from_str(span).map_err(DecodeError::Malformed)?;
    serde_json::from_value(value).map_err(DecodeError::Schema)
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

/// Every `"..."`-quoted substring, in order, without empties or repeats.
pub fn double_quoted(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#""(.*?)""#).expect("static regex"));
    collect_unique(re, text)
}

/// Every `'...'`-quoted substring, in order, without empties or repeats.
pub fn single_quoted(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"'(.*?)'").expect("static regex"));
    collect_unique(re, text)
}

fn collect_unique(re: &Regex, text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in re.captures_iter(text) {
        let item = cap[1].trim();
        if !item.is_empty() && !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// First sentence of a definition, keeping the terminating period.
pub fn first_sentence(text: &str) -> &str {
    match text.find('.') {
        Some(end) => &text[..=end],
        None => text,
    }
}
