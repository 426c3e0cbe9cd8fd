//! Test doubles and provider selection.
//!
//! Scripted stand-ins for the completion service and every retrieval
//! collaborator, so episodes can run without network access.

use crate::error::{LLMError, RetrievalError};
use crate::evidence::Passage;
use crate::llm::{Completion, CompletionService};
use crate::prompts::PromptKind;
use crate::sources::{
    Direction, DocumentRetriever, EntityCandidate, EntityLinker, EntityResolver,
    KnowledgeEntity, LinkedEntity, RelationCatalog, RelationRef, RelationSet,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Completion doubles
// ============================================================================

/// Round-robin over fixed responses.
pub struct MockCompletion {
    pub responses: Vec<String>,
    tokens: u64,
    response_idx: AtomicUsize,
}

impl MockCompletion {
    pub fn new(responses: Vec<String>, tokens: u64) -> Self {
        Self {
            responses,
            tokens,
            response_idx: AtomicUsize::new(0),
        }
    }

    pub fn always(response: &str, tokens: u64) -> Self {
        Self::new(vec![response.to_string()], tokens)
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, LLMError> {
        let idx = self.response_idx.fetch_add(1, Ordering::SeqCst);
        let text = self
            .responses
            .get(idx % self.responses.len().max(1))
            .cloned()
            .unwrap_or_else(|| "Mock response".to_string());
        Ok(Completion::new(text, self.tokens))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

#[derive(Debug)]
struct Rule {
    kind: PromptKind,
    needle: Option<String>,
    replies: Vec<Reply>,
    next: usize,
}

impl Rule {
    fn matches(&self, kind: PromptKind, system: &str, user: &str) -> bool {
        self.kind == kind
            && self
                .needle
                .as_deref()
                .map_or(true, |n| system.contains(n) || user.contains(n))
    }

    // The last reply repeats once the sequence is used up.
    fn take(&mut self) -> Reply {
        let idx = self.next.min(self.replies.len().saturating_sub(1));
        self.next += 1;
        self.replies
            .get(idx)
            .cloned()
            .unwrap_or(Reply::Fail)
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: Option<PromptKind>,
    pub system: String,
    pub user: String,
    pub tokens: u64,
}

/// Replies chosen by prompt kind, optionally narrowed by a substring of the
/// prompt. Every call is recorded.
pub struct ScriptedCompletion {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    tokens_per_call: u64,
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            tokens_per_call: 10,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// Default reply for `kind`, replacing any earlier default.
    pub fn on(self, kind: PromptKind, reply: &str) -> Self {
        self.set_rule(kind, None, vec![Reply::Text(reply.to_string())])
    }

    /// Replies in order for `kind`; the last one repeats.
    pub fn sequence(self, kind: PromptKind, replies: &[&str]) -> Self {
        let replies = replies.iter().map(|r| Reply::Text(r.to_string())).collect();
        self.set_rule(kind, None, replies)
    }

    /// Reply for `kind` when the prompt contains `needle`. Checked before defaults.
    pub fn when(self, kind: PromptKind, needle: &str, reply: &str) -> Self {
        self.set_rule(
            kind,
            Some(needle.to_string()),
            vec![Reply::Text(reply.to_string())],
        )
    }

    /// Calls of `kind` fail with an API error.
    pub fn failing(self, kind: PromptKind) -> Self {
        self.set_rule(kind, None, vec![Reply::Fail])
    }

    fn set_rule(self, kind: PromptKind, needle: Option<String>, replies: Vec<Reply>) -> Self {
        {
            let mut rules = self.rules.lock();
            rules.retain(|r| !(r.kind == kind && r.needle == needle));
            let rule = Rule {
                kind,
                needle,
                replies,
                next: 0,
            };
            if rule.needle.is_some() {
                rules.insert(0, rule);
            } else {
                rules.push(rule);
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, kind: PromptKind) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == Some(kind))
            .count()
    }

    pub fn total_tokens(&self) -> u64 {
        self.calls.lock().iter().map(|c| c.tokens).sum()
    }

    /// Offline script: a one-node tree that is accepted and answered.
    pub fn offline() -> Self {
        Self::new()
            .on(
                PromptKind::TreeConstruction,
                r#"{"logic_tree": {"children": [{"sub_question": "What is being asked?", "hypothesis_answer": "Unknown without a configured model.", "children": []}]}, "answer": "Unknown"}"#,
            )
            .on(PromptKind::EntityExtraction, "")
            .on(PromptKind::EntityFilter, "[]")
            .on(PromptKind::RelationSelection, r#"{"outgoing_relations": [], "incoming_relations": []}"#)
            .on(
                PromptKind::FactCheck,
                r#"{"isTrue": "unknown", "fact_sufficient": true, "reason": "None", "ref": {}}"#,
            )
            .on(PromptKind::NewClue, r#"{"new_clue": ""}"#)
            .on(PromptKind::FinalAnswer, "Mock answer")
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LLMError> {
        let kind = PromptKind::classify(system);
        let reply = kind.and_then(|kind| {
            self.rules
                .lock()
                .iter_mut()
                .find(|r| r.matches(kind, system, user))
                .map(Rule::take)
        });

        let tokens = match reply {
            Some(Reply::Text(_)) => self.tokens_per_call,
            _ => 0,
        };
        self.calls.lock().push(RecordedCall {
            kind,
            system: system.to_string(),
            user: user.to_string(),
            tokens,
        });

        match reply {
            Some(Reply::Text(text)) => Ok(Completion::new(text, tokens)),
            Some(Reply::Fail) => Err(LLMError::Api("scripted failure".to_string())),
            None => Err(LLMError::Api(format!(
                "no scripted reply for {}",
                kind.map(|k| k.to_string()).unwrap_or_else(|| "unclassified prompt".to_string())
            ))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Retrieval doubles
// ============================================================================

/// Links every registered mention that appears in the text.
#[derive(Debug, Default)]
pub struct StaticLinker {
    entities: Vec<LinkedEntity>,
}

impl StaticLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mention: &str, url: &str, definition: &str) -> Self {
        self.entities.push(LinkedEntity {
            mention: mention.to_string(),
            knowledge_base_url: url.to_string(),
            definition: definition.to_string(),
        });
        self
    }
}

#[async_trait]
impl EntityLinker for StaticLinker {
    async fn link(&self, text: &str) -> Result<Vec<LinkedEntity>, RetrievalError> {
        Ok(self
            .entities
            .iter()
            .filter(|e| text.contains(&e.mention))
            .cloned()
            .collect())
    }
}

/// Label → (id, definition) table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: Vec<(String, String, EntityCandidate)>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: &str, id: &str, definition: &str) -> Self {
        self.entries.push((
            label.to_lowercase(),
            id.to_string(),
            EntityCandidate {
                label: label.to_string(),
                definition: definition.to_string(),
            },
        ));
        self
    }
}

#[async_trait]
impl EntityResolver for StaticResolver {
    async fn resolve(
        &self,
        labels: &[String],
    ) -> Result<BTreeMap<String, EntityCandidate>, RetrievalError> {
        let wanted: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
        Ok(self
            .entries
            .iter()
            .filter(|(label, _, _)| wanted.contains(label))
            .map(|(_, id, candidate)| (id.clone(), candidate.clone()))
            .collect())
    }
}

/// Fixed relations and values per entity.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    relations: HashMap<String, RelationSet>,
    values: HashMap<(String, String, Direction), String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outgoing(self, entity: &str, pid: &str, label: &str, value: &str) -> Self {
        self.relation(entity, pid, label, value, Direction::Outgoing)
    }

    pub fn incoming(self, entity: &str, pid: &str, label: &str, value: &str) -> Self {
        self.relation(entity, pid, label, value, Direction::Incoming)
    }

    fn relation(
        mut self,
        entity: &str,
        pid: &str,
        label: &str,
        value: &str,
        direction: Direction,
    ) -> Self {
        let set = self.relations.entry(entity.to_string()).or_default();
        let list = match direction {
            Direction::Outgoing => &mut set.outgoing,
            Direction::Incoming => &mut set.incoming,
        };
        list.push(RelationRef {
            id: pid.to_string(),
            label: label.to_string(),
        });
        self.values.insert(
            (entity.to_string(), pid.to_string(), direction),
            value.to_string(),
        );
        self
    }
}

#[async_trait]
impl RelationCatalog for StaticCatalog {
    async fn relations_of(&self, entity_id: &str) -> Result<RelationSet, RetrievalError> {
        Ok(self.relations.get(entity_id).cloned().unwrap_or_default())
    }

    async fn value_of(
        &self,
        entity_id: &str,
        relation_id: &str,
        direction: Direction,
    ) -> Result<Option<String>, RetrievalError> {
        Ok(self
            .values
            .get(&(entity_id.to_string(), relation_id.to_string(), direction))
            .cloned())
    }
}

/// Fixed passages per entity id.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    passages: HashMap<String, Vec<Passage>>,
    failing: bool,
    requests: Arc<AtomicUsize>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request fails with a network error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn passage(mut self, entity: &str, id: &str, title: &str, content: &str) -> Self {
        self.passages
            .entry(entity.to_string())
            .or_default()
            .push(Passage {
                id: id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
            });
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRetriever for StaticRetriever {
    async fn retrieve(
        &self,
        entity: &KnowledgeEntity,
        _query: &str,
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RetrievalError::Network("connection refused".to_string()));
        }
        Ok(self
            .passages
            .get(&entity.id)
            .map(|p| p.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// Provider selection
// ============================================================================

/// Select a completion service by name: `openai` (any OpenAI-compatible
/// endpoint) or `mock` (offline script).
#[cfg(feature = "openai")]
pub fn create_completion_service(
    provider_type: &str,
    config: &crate::llm::providers::ModelConfig,
) -> Result<Arc<dyn CompletionService>, LLMError> {
    match provider_type {
        "openai" => Ok(Arc::new(crate::llm::providers::OpenAICompatibleClient::new(
            config.clone(),
        )?)),
        "mock" => Ok(Arc::new(ScriptedCompletion::offline())),
        other => Err(LLMError::NotConfigured(format!("unknown provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_round_robin() {
        let provider = MockCompletion::new(vec!["a".into(), "b".into()], 1);
        assert_eq!(provider.complete("s", "u").await.unwrap().text, "a");
        assert_eq!(provider.complete("s", "u").await.unwrap().text, "b");
        assert_eq!(provider.complete("s", "u").await.unwrap().text, "a");
    }

    #[tokio::test]
    async fn test_scripted_routes_by_kind_and_needle() {
        let fact_check = crate::prompts::fact_check("Who composed Manru?", "Chopin", "none");
        let other = crate::prompts::fact_check("Where was he born?", "Kuryłówka", "none");
        let script = ScriptedCompletion::new()
            .on(PromptKind::FactCheck, "default")
            .when(PromptKind::FactCheck, "Chopin", "refuted");

        let out = script.complete(&fact_check.system, &fact_check.user).await.unwrap();
        assert_eq!(out.text, "refuted");
        let out = script.complete(&other.system, &other.user).await.unwrap();
        assert_eq!(out.text, "default");
        assert_eq!(script.count(PromptKind::FactCheck), 2);
        assert_eq!(script.total_tokens(), 20);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let p = crate::prompts::new_clue("q", "e");
        let script = ScriptedCompletion::new().sequence(PromptKind::NewClue, &["one", "two"]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(script.complete(&p.system, &p.user).await.unwrap().text);
        }
        assert_eq!(seen, vec!["one", "two", "two"]);
    }

    #[tokio::test]
    async fn test_unscripted_kind_fails_without_tokens() {
        let script = ScriptedCompletion::new();
        let p = crate::prompts::final_answer("q", "{}");
        assert!(script.complete(&p.system, &p.user).await.is_err());
        assert_eq!(script.total_tokens(), 0);
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_unknown_provider() {
        let cfg = crate::llm::providers::ModelConfig::default();
        assert!(create_completion_service("nope", &cfg).is_err());
        assert!(create_completion_service("mock", &cfg).is_ok());
    }
}
