//! Wikidata entity resolver and relation catalog.
//!
//! ```text
//! labels ──► wbsearchentities ──► id → {label, definition}
//! id     ──► SPARQL (wd:ID ?p ?o  |  ?s ?p wd:ID) ──► catalog-known P-ids
//! id, P  ──► SPARQL wdt:P value + label service ──► "a, b, c"
//! id     ──► wbgetentities sitelinks ──► enwiki title
//! ```
//!
//! Every request goes through [`send_with_retry`].

use crate::properties::PropertyCatalog;
use crate::retry::{send_with_retry, RetryConfig};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use treeqa_core::{
    Direction, EntityCandidate, EntityResolver, RelationCatalog, RelationRef, RelationSet,
    RetrievalError,
};
use url::Url;

const LABEL_SERVICE: &str =
    r#"SERVICE wikibase:label { bd:serviceParam wikibase:language "en,[AUTO_LANGUAGE]". }"#;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikidataConfig {
    pub api_url: String,
    pub sparql_url: String,
    pub user_agent: String,
    pub proxy: Option<String>,
    /// JSON list of `{id, label}`; relations outside it are never offered.
    pub property_catalog: Option<PathBuf>,
    pub search_limit: usize,
    pub timeout_secs: u64,
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.wikidata.org/w/api.php".to_string(),
            sparql_url: "https://query.wikidata.org/sparql".to_string(),
            user_agent: format!("treeqa/{} (research question answering)", env!("CARGO_PKG_VERSION")),
            proxy: None,
            property_catalog: None,
            search_limit: 2,
            timeout_secs: 30,
        }
    }
}

/// Shared HTTP client honoring the proxy, timeout and user agent.
pub fn build_http_client(
    user_agent: &str,
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, RetrievalError> {
    let mut builder = reqwest::Client::builder().user_agent(user_agent).timeout(timeout);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| RetrievalError::Network(format!("invalid proxy {proxy}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| RetrievalError::Network(format!("failed to build http client: {e}")))
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    label: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct WikidataClient {
    http: reqwest::Client,
    config: Arc<WikidataConfig>,
    properties: Arc<PropertyCatalog>,
    retry: RetryConfig,
}

impl WikidataClient {
    pub fn new(
        config: WikidataConfig,
        properties: PropertyCatalog,
        retry: RetryConfig,
    ) -> Result<Self, RetrievalError> {
        let http = build_http_client(
            &config.user_agent,
            config.proxy.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            http,
            config: Arc::new(config),
            properties: Arc::new(properties),
            retry,
        })
    }

    pub fn properties(&self) -> &PropertyCatalog {
        &self.properties
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RetrievalError> {
        let url = Url::parse_with_params(base, params)
            .map_err(|e| RetrievalError::Network(format!("invalid endpoint {base}: {e}")))?;
        let response = send_with_retry(
            || {
                self.http
                    .get(url.clone())
                    .header(reqwest::header::ACCEPT, "application/sparql-results+json, application/json")
            },
            &self.retry,
        )
        .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))
    }

    async fn sparql(&self, query: &str) -> Result<Vec<HashMap<String, SparqlTerm>>, RetrievalError> {
        tracing::debug!(query, "sparql");
        let response: SparqlResponse = self
            .get_json(&self.config.sparql_url, &[("query", query), ("format", "json")])
            .await?;
        Ok(response.results.bindings)
    }

    /// Hits for one label that carry both a label and a description.
    pub async fn search(&self, label: &str) -> Result<Vec<(String, EntityCandidate)>, RetrievalError> {
        let limit = self.config.search_limit.to_string();
        let response: SearchResponse = self
            .get_json(
                &self.config.api_url,
                &[
                    ("action", "wbsearchentities"),
                    ("search", label),
                    ("language", "en"),
                    ("format", "json"),
                    ("limit", &limit),
                    ("type", "item"),
                ],
            )
            .await?;

        Ok(response
            .search
            .into_iter()
            .filter_map(|hit| match (hit.label, hit.description) {
                (Some(label), Some(definition)) => Some((hit.id, EntityCandidate { label, definition })),
                _ => None,
            })
            .collect())
    }

    /// English Wikipedia article title for an entity, if it has one.
    pub async fn sitelink_title(&self, entity_id: &str) -> Result<Option<String>, RetrievalError> {
        let id = checked_id(entity_id)?;
        let response: serde_json::Value = self
            .get_json(
                &self.config.api_url,
                &[
                    ("action", "wbgetentities"),
                    ("ids", id),
                    ("sites", "enwiki"),
                    ("props", "sitelinks"),
                    ("format", "json"),
                ],
            )
            .await?;
        Ok(response["entities"][id]["sitelinks"]["enwiki"]["title"]
            .as_str()
            .map(str::to_string))
    }

    async fn properties_in(&self, query: &str) -> Result<Vec<RelationRef>, RetrievalError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for binding in self.sparql(query).await? {
            let Some(uri) = binding.get("property").map(|t| t.value.as_str()) else {
                continue;
            };
            let Some(pid) = property_id(uri) else { continue };
            let Some(label) = self.properties.label(pid) else { continue };
            if seen.insert(pid.to_string()) {
                out.push(RelationRef {
                    id: pid.to_string(),
                    label: label.to_string(),
                });
            }
        }
        Ok(out)
    }
}

/// `http://www.wikidata.org/prop/direct/P19` → `P19`.
fn property_id(uri: &str) -> Option<&str> {
    if !uri.contains("wikidata") {
        return None;
    }
    uri.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

/// Ids are spliced into SPARQL text, so only `Q123` / `P45` shapes pass.
fn checked_id(id: &str) -> Result<&str, RetrievalError> {
    static ID: OnceLock<Regex> = OnceLock::new();
    let re = ID.get_or_init(|| Regex::new(r"^[QP][0-9]+$").expect("static regex"));
    if re.is_match(id) {
        Ok(id)
    } else {
        Err(RetrievalError::NotFound(format!("not a Wikidata id: {id}")))
    }
}

fn outgoing_properties_query(id: &str) -> String {
    format!("SELECT DISTINCT ?property WHERE {{ wd:{id} ?property ?target . {LABEL_SERVICE} }} LIMIT 100")
}

fn incoming_properties_query(id: &str) -> String {
    format!("SELECT DISTINCT ?property WHERE {{ ?item ?property wd:{id} . {LABEL_SERVICE} }} LIMIT 100")
}

fn value_query(id: &str, pid: &str, direction: Direction) -> String {
    let pattern = match direction {
        Direction::Outgoing => format!("wd:{id} wdt:{pid} ?value ."),
        Direction::Incoming => format!("?value wdt:{pid} wd:{id} ."),
    };
    format!("SELECT ?value ?valueLabel WHERE {{ {pattern} {LABEL_SERVICE} }} LIMIT 10")
}

// ============================================================================
// Collaborator impls
// ============================================================================

#[async_trait]
impl EntityResolver for WikidataClient {
    async fn resolve(
        &self,
        labels: &[String],
    ) -> Result<BTreeMap<String, EntityCandidate>, RetrievalError> {
        let mut out = BTreeMap::new();
        let mut last_error = None;
        for label in labels {
            match self.search(label).await {
                Ok(hits) => out.extend(hits),
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "entity search failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if out.is_empty() => Err(e),
            _ => Ok(out),
        }
    }
}

#[async_trait]
impl RelationCatalog for WikidataClient {
    async fn relations_of(&self, entity_id: &str) -> Result<RelationSet, RetrievalError> {
        let id = checked_id(entity_id)?;
        let outgoing_query = outgoing_properties_query(id);
        let incoming_query = incoming_properties_query(id);
        let (outgoing, incoming) = tokio::join!(
            self.properties_in(&outgoing_query),
            self.properties_in(&incoming_query),
        );
        Ok(RelationSet {
            outgoing: outgoing?,
            incoming: incoming?,
        })
    }

    async fn value_of(
        &self,
        entity_id: &str,
        relation_id: &str,
        direction: Direction,
    ) -> Result<Option<String>, RetrievalError> {
        let id = checked_id(entity_id)?;
        let pid = checked_id(relation_id)?;
        let values: Vec<String> = self
            .sparql(&value_query(id, pid, direction))
            .await?
            .into_iter()
            .filter_map(|mut b| b.remove("valueLabel").or_else(|| b.remove("value")))
            .map(|t| t.value)
            .collect();

        Ok((!values.is_empty()).then(|| values.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client(server: &MockServer) -> WikidataClient {
        let config = WikidataConfig {
            api_url: format!("{}/w/api.php", server.uri()),
            sparql_url: format!("{}/sparql", server.uri()),
            ..WikidataConfig::default()
        };
        let properties: PropertyCatalog =
            [("P19", "place of birth"), ("P86", "composer")].into_iter().collect();
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        };
        WikidataClient::new(config, properties, retry).unwrap()
    }

    fn sparql_contains(needle: &'static str) -> impl Fn(&Request) -> bool + Send + Sync {
        move |req: &Request| {
            req.url
                .query_pairs()
                .any(|(k, v)| k == "query" && v.contains(needle))
        }
    }

    fn bindings(rows: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"head": {}, "results": {"bindings": rows}}))
    }

    #[tokio::test]
    async fn test_resolve_keeps_described_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("action", "wbsearchentities"))
            .and(query_param("search", "Paderewski"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "search": [
                    {"id": "Q272422", "label": "Ignacy Jan Paderewski", "description": "Polish pianist"},
                    {"id": "Q999", "label": "Paderewski"}
                ]
            })))
            .mount(&server)
            .await;

        let found = client(&server).resolve(&["Paderewski".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["Q272422"].definition, "Polish pianist");
    }

    #[tokio::test]
    async fn test_relations_filtered_by_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .and(sparql_contains("wd:Q272422 ?property ?target"))
            .respond_with(bindings(json!([
                {"property": {"type": "uri", "value": "http://www.wikidata.org/prop/direct/P19"}},
                {"property": {"type": "uri", "value": "http://www.wikidata.org/prop/P19"}},
                {"property": {"type": "uri", "value": "http://www.wikidata.org/prop/direct/P31"}},
                {"property": {"type": "uri", "value": "http://schema.org/description"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .and(sparql_contains("?item ?property wd:Q272422"))
            .respond_with(bindings(json!([
                {"property": {"type": "uri", "value": "http://www.wikidata.org/prop/direct/P86"}}
            ])))
            .mount(&server)
            .await;

        let relations = client(&server).relations_of("Q272422").await.unwrap();
        assert_eq!(
            relations.outgoing,
            vec![RelationRef { id: "P19".into(), label: "place of birth".into() }]
        );
        assert_eq!(relations.incoming[0].id, "P86");
    }

    #[tokio::test]
    async fn test_value_of_joins_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .and(sparql_contains("?value wdt:P86 wd:Q272422"))
            .respond_with(bindings(json!([
                {"value": {"type": "uri", "value": "http://www.wikidata.org/entity/Q1888474"},
                 "valueLabel": {"type": "literal", "value": "Manru"}},
                {"value": {"type": "uri", "value": "http://www.wikidata.org/entity/Q1"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .and(sparql_contains("wd:Q272422 wdt:P86 ?value"))
            .respond_with(bindings(json!([])))
            .mount(&server)
            .await;

        let wiki = client(&server);
        let incoming = wiki.value_of("Q272422", "P86", Direction::Incoming).await.unwrap();
        assert_eq!(incoming.as_deref(), Some("Manru, http://www.wikidata.org/entity/Q1"));
        let outgoing = wiki.value_of("Q272422", "P86", Direction::Outgoing).await.unwrap();
        assert_eq!(outgoing, None);
    }

    #[tokio::test]
    async fn test_rejects_non_ids_before_querying() {
        let server = MockServer::start().await;
        let err = client(&server)
            .value_of("Q1 } DROP", "P86", Direction::Outgoing)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sitelink_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "wbgetentities"))
            .and(query_param("ids", "Q1888474"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": {"Q1888474": {"sitelinks": {"enwiki": {"site": "enwiki", "title": "Manru"}}}}
            })))
            .mount(&server)
            .await;

        let title = client(&server).sitelink_title("Q1888474").await.unwrap();
        assert_eq!(title.as_deref(), Some("Manru"));
    }

    #[tokio::test]
    async fn test_sparql_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sparql"))
            .respond_with(bindings(json!([{"valueLabel": {"value": "Kuryłówka"}}])))
            .mount(&server)
            .await;

        let value = client(&server)
            .value_of("Q272422", "P19", Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("Kuryłówka"));
    }

    #[test]
    fn test_property_id_from_uri() {
        assert_eq!(property_id("http://www.wikidata.org/prop/direct/P19"), Some("P19"));
        assert_eq!(property_id("http://schema.org/name"), None);
    }
}
