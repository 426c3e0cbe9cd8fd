//! Wikipedia passage retrieval.
//!
//! ```text
//! entity ──► enwiki sitelink (or label) ──► plain-text extract
//!        ──► sections (== Heading ==) ──► sentence chunks ──► ranked top K
//! ```
//!
//! Chunk ids are `{article}_{section}_{part}` so a judgment can cite them.

use crate::embedding::{cosine, Embedder};
use crate::retry::send_once;
use crate::wikidata::WikidataClient;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use treeqa_core::{DocumentRetriever, KnowledgeEntity, Passage, RetrievalError};
use url::Url;

const INTRODUCTION: &str = "Introduction";
const SKIPPED_SECTIONS: &[&str] = &["References", "External links"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    pub api_url: String,
    /// Word budget per chunk. Sentences are never split.
    pub chunk_words: usize,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            api_url: "https://en.wikipedia.org/w/api.php".to_string(),
            chunk_words: 75,
        }
    }
}

// ============================================================================
// Sectioning and chunking
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub text: String,
}

fn heading(line: &str) -> Option<(usize, &str)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(={2,6})\s*(.*?)\s*={2,6}\s*$").expect("static regex"));
    let caps = re.captures(line.trim())?;
    let level = caps.get(1)?.as_str().len();
    Some((level, caps.get(2)?.as_str()))
}

/// Split a plain-text extract into titled sections.
///
/// Text before the first heading is the introduction. Nested headings are
/// titled `Parent > Child`. Skipped sections take their subsections with them.
pub fn split_sections(extract: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut title = INTRODUCTION.to_string();
    let mut skipping = false;
    let mut text = String::new();

    let mut flush = |title: &str, text: &mut String, skipping: bool| {
        let body = text.trim();
        if !skipping && !body.is_empty() {
            sections.push(Section {
                title: title.to_string(),
                text: body.to_string(),
            });
        }
        text.clear();
    };

    for line in extract.lines() {
        match heading(line) {
            Some((level, name)) => {
                flush(&title, &mut text, skipping);
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, name.to_string()));
                skipping = stack.iter().any(|(_, n)| SKIPPED_SECTIONS.contains(&n.as_str()));
                title = stack
                    .iter()
                    .map(|(_, n)| n.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
            }
            None => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }
    flush(&title, &mut text, skipping);

    sections
}

/// Sentence boundaries: `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Greedy packing of whole sentences into chunks of at most `budget` words.
/// A sentence longer than the budget becomes a chunk of its own.
pub fn chunk_sentences(text: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut words = 0;

    for sentence in split_sentences(text) {
        let n = sentence.split_whitespace().count();
        if !current.is_empty() && words + n > budget {
            chunks.push(current.join(" "));
            current.clear();
            words = 0;
        }
        current.push(sentence);
        words += n;
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// All chunks of an article as passages.
pub fn article_passages(article: &str, extract: &str, budget: usize) -> Vec<Passage> {
    split_sections(extract)
        .into_iter()
        .enumerate()
        .flat_map(|(section_idx, section)| {
            chunk_sentences(&section.text, budget)
                .into_iter()
                .enumerate()
                .map(move |(part_idx, content)| Passage {
                    id: format!("{article}_{section_idx}_{part_idx}"),
                    title: section.title.clone(),
                    content,
                })
        })
        .collect()
}

// ============================================================================
// Ranking
// ============================================================================

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Distinct query terms present in each passage. Ties keep article order.
pub fn rank_lexical(query: &str, passages: Vec<Passage>, top_k: usize) -> Vec<Passage> {
    let wanted = terms(query);
    let mut scored: Vec<(usize, Passage)> = passages
        .into_iter()
        .map(|p| (terms(&p.content).intersection(&wanted).count(), p))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(top_k).map(|(_, p)| p).collect()
}

async fn rank_embedded(
    embedder: &dyn Embedder,
    query: &str,
    passages: Vec<Passage>,
    top_k: usize,
) -> Result<Vec<Passage>, RetrievalError> {
    let mut inputs = Vec::with_capacity(passages.len() + 1);
    inputs.push(query.to_string());
    inputs.extend(passages.iter().map(|p| p.content.clone()));

    let vectors = embedder.embed(&inputs).await?;
    let Some((probe, rest)) = vectors.split_first() else {
        return Ok(Vec::new());
    };
    let mut scored: Vec<(f32, Passage)> = rest
        .iter()
        .map(|v| cosine(probe, v))
        .zip(passages)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(scored.into_iter().take(top_k).map(|(_, p)| p).collect())
}

// ============================================================================
// Retriever
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    query: ExtractQuery,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: serde_json::Map<String, serde_json::Value>,
}

pub struct WikipediaRetriever {
    config: WikipediaConfig,
    wikidata: WikidataClient,
    embedder: Option<Arc<dyn Embedder>>,
}

impl WikipediaRetriever {
    /// Shares the Wikidata client's HTTP client and retry policy.
    pub fn new(config: WikipediaConfig, wikidata: WikidataClient) -> Self {
        Self {
            config,
            wikidata,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn article_title(&self, entity: &KnowledgeEntity) -> String {
        match self.wikidata.sitelink_title(&entity.id).await {
            Ok(Some(title)) => title,
            Ok(None) => entity.label.clone(),
            Err(e) => {
                tracing::debug!(entity = %entity.id, error = %e, "no sitelink, using label");
                entity.label.clone()
            }
        }
    }

    pub async fn fetch_extract(&self, title: &str) -> Result<String, RetrievalError> {
        let url = Url::parse_with_params(
            &self.config.api_url,
            &[
                ("action", "query"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("format", "json"),
                ("titles", title),
            ],
        )
        .map_err(|e| RetrievalError::Network(format!("invalid endpoint {}: {e}", self.config.api_url)))?;

        let response = send_once(self.wikidata.http().get(url)).await?;
        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;

        body.query
            .pages
            .values()
            .find_map(|page| page.get("extract").and_then(|e| e.as_str()))
            .map(str::to_string)
            .ok_or_else(|| RetrievalError::NotFound(format!("no Wikipedia article {title}")))
    }
}

#[async_trait]
impl DocumentRetriever for WikipediaRetriever {
    async fn retrieve(
        &self,
        entity: &KnowledgeEntity,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let title = self.article_title(entity).await;
        let extract = self.fetch_extract(&title).await?;
        let passages = article_passages(&title, &extract, self.config.chunk_words);
        tracing::debug!(article = %title, chunks = passages.len(), "chunked article");

        if let Some(embedder) = &self.embedder {
            match rank_embedded(embedder.as_ref(), query, passages.clone(), top_k).await {
                Ok(ranked) => return Ok(ranked),
                Err(e) => tracing::warn!(error = %e, "embedding failed, ranking lexically"),
            }
        }
        Ok(rank_lexical(query, passages, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyCatalog;
    use crate::retry::RetryConfig;
    use crate::wikidata::WikidataConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PADEREWSKI: &str = "Ignacy Jan Paderewski was a Polish pianist. He was also a statesman.

== Early life ==
Paderewski was born in the village of Kuryłówka. His father was an estate manager.

=== Education ===
He entered the Warsaw Conservatory in 1872.

== Compositions ==
He composed the opera Manru. It premiered in Dresden in 1901!

== References ==
Some citation.

=== Notes ===
More citations.
";

    #[test]
    fn test_sections_titles_and_skips() {
        let sections = split_sections(PADEREWSKI);
        let titles: Vec<_> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Introduction", "Early life", "Early life > Education", "Compositions"]
        );
        assert!(sections[1].text.starts_with("Paderewski was born"));
    }

    #[test]
    fn test_sentence_split_on_terminal_punctuation() {
        let s = split_sentences("One. Two!  Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
        assert_eq!(split_sentences("Version 1.5 shipped."), vec!["Version 1.5 shipped."]);
    }

    #[test]
    fn test_chunks_respect_budget_without_splitting_sentences() {
        let text = "a b c. d e f. g h i j k l m n.";
        let chunks = chunk_sentences(text, 6);
        assert_eq!(chunks, vec!["a b c. d e f.", "g h i j k l m n."]);
    }

    #[test]
    fn test_passage_ids() {
        let passages = article_passages("Paderewski", PADEREWSKI, 8);
        let ids: Vec<_> = passages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "Paderewski_0_0",
                "Paderewski_0_1",
                "Paderewski_1_0",
                "Paderewski_1_1",
                "Paderewski_2_0",
                "Paderewski_3_0",
                "Paderewski_3_1"
            ]
        );
        assert_eq!(passages[4].title, "Early life > Education");
        assert_eq!(passages[5].content, "He composed the opera Manru.");
    }

    #[test]
    fn test_lexical_ranking_prefers_overlap() {
        let passages = article_passages("Paderewski", PADEREWSKI, 75);
        let top = rank_lexical("Where was Paderewski born? Kuryłówka", passages, 1);
        assert_eq!(top[0].id, "Paderewski_1_0");
    }

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("opera") || t.contains("Manru") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn wikidata(server: &MockServer) -> WikidataClient {
        let config = WikidataConfig {
            api_url: format!("{}/wikidata", server.uri()),
            ..WikidataConfig::default()
        };
        WikidataClient::new(config, PropertyCatalog::default(), RetryConfig::default()).unwrap()
    }

    async fn mount_article(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/wikidata"))
            .and(query_param("action", "wbgetentities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": {"Q272422": {"sitelinks": {"enwiki": {"title": "Ignacy Jan Paderewski"}}}}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wikipedia"))
            .and(query_param("titles", "Ignacy Jan Paderewski"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {"123": {"pageid": 123, "title": "Ignacy Jan Paderewski", "extract": PADEREWSKI}}}
            })))
            .mount(server)
            .await;
    }

    fn entity() -> KnowledgeEntity {
        KnowledgeEntity {
            id: "Q272422".into(),
            label: "Paderewski".into(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_through_sitelink() {
        let server = MockServer::start().await;
        mount_article(&server).await;

        let retriever = WikipediaRetriever::new(
            WikipediaConfig {
                api_url: format!("{}/wikipedia", server.uri()),
                ..WikipediaConfig::default()
            },
            wikidata(&server),
        );
        let passages = retriever.retrieve(&entity(), "Where was he born?", 2).await.unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].id, "Ignacy Jan Paderewski_1_0");
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_embedding() {
        let server = MockServer::start().await;
        mount_article(&server).await;

        let retriever = WikipediaRetriever::new(
            WikipediaConfig {
                api_url: format!("{}/wikipedia", server.uri()),
                ..WikipediaConfig::default()
            },
            wikidata(&server),
        )
        .with_embedder(Arc::new(AxisEmbedder));
        let passages = retriever.retrieve(&entity(), "Which opera?", 1).await.unwrap();
        assert_eq!(passages[0].title, "Compositions");
    }

    #[tokio::test]
    async fn test_missing_article_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wikipedia"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {"-1": {"title": "Nowhere", "missing": ""}}}
            })))
            .mount(&server)
            .await;

        let retriever = WikipediaRetriever::new(
            WikipediaConfig {
                api_url: format!("{}/wikipedia", server.uri()),
                ..WikipediaConfig::default()
            },
            wikidata(&server),
        );
        let err = retriever.retrieve(&entity(), "q", 2).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_extract_rate_limit_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wikipedia"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wikipedia"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {"1": {"title": "Manru", "extract": "Manru is an opera."}}}
            })))
            .expect(0)
            .mount(&server)
            .await;

        let retriever = WikipediaRetriever::new(
            WikipediaConfig {
                api_url: format!("{}/wikipedia", server.uri()),
                ..WikipediaConfig::default()
            },
            wikidata(&server),
        );
        let err = retriever.fetch_extract("Manru").await.unwrap_err();
        assert!(matches!(err, RetrievalError::RateLimited));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
