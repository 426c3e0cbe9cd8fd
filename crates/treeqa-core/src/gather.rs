//! Evidence gathering for one probe text.
//!
//! ```text
//!  probe ──┬─► mention extraction (model) ─┐
//!          └─► entity linking ─────────────┴─► resolve + merge ─► relevance filter (model)
//!                                                                   │
//!                        ┌──────────────── per kept id ─────────────┤
//!                        ▼                                          ▼
//!        relations_of ─► selection (model) ─► value_of×N      retrieve passages
//!                        └──────────────► EvidenceBox ◄─────────────┘
//! ```
//!
//! Every fan-out joins before [`QueryInfoGatherer::gather`] returns. A failed
//! task is logged and contributes nothing; it never cancels its siblings.

use crate::config::EngineConfig;
use crate::decode::{first_sentence, double_quoted, single_quoted};
use crate::error::RetrievalError;
use crate::evidence::{EvidenceBox, GraphFact};
use crate::llm::MeteredModel;
use crate::prompts;
use crate::sources::{
    Direction, DocumentRetriever, EntityCandidate, EntityLinker, EntityResolver,
    KnowledgeEntity, RelationCatalog, RelationRef, RelationSet,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// The external collaborators one engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub linker: Arc<dyn EntityLinker>,
    pub resolver: Arc<dyn EntityResolver>,
    pub catalog: Arc<dyn RelationCatalog>,
    pub retriever: Arc<dyn DocumentRetriever>,
}

/// What one gather call selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatherOutcome {
    /// Knowledge-base ids kept by the relevance filter, in filter order.
    pub knowledge_ids: Vec<String>,
    /// Relation ids chosen for any kept entity.
    pub relation_ids: BTreeSet<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RelationChoice {
    #[serde(default, alias = "pointing_relations")]
    outgoing_relations: Vec<String>,
    #[serde(default, alias = "pointed_relations")]
    incoming_relations: Vec<String>,
}

#[derive(Clone)]
pub struct QueryInfoGatherer {
    model: MeteredModel,
    sources: Collaborators,
    config: Arc<EngineConfig>,
}

impl QueryInfoGatherer {
    pub fn new(model: MeteredModel, sources: Collaborators, config: Arc<EngineConfig>) -> Self {
        Self {
            model,
            sources,
            config,
        }
    }

    /// Fill `evidence` with facts and passages relevant to `probe`.
    pub async fn gather(&self, probe: &str, evidence: &Arc<EvidenceBox>) -> GatherOutcome {
        let (mentions, linked) = tokio::join!(
            self.extract_mentions(probe),
            self.sources.linker.link(probe)
        );

        let linked = linked.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "entity linking failed");
            Vec::new()
        });

        let mut candidates = if mentions.is_empty() {
            BTreeMap::new()
        } else {
            self.sources
                .resolver
                .resolve(&mentions)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, ?mentions, "entity resolution failed");
                    BTreeMap::new()
                })
        };

        for entity in linked {
            let id = entity.knowledge_base_id();
            if id.is_empty() || id == "N/A" {
                continue;
            }
            candidates.insert(
                id.to_string(),
                EntityCandidate {
                    label: entity.mention.clone(),
                    definition: first_sentence(&entity.definition).to_string(),
                },
            );
        }

        if candidates.is_empty() {
            tracing::debug!(probe, "no entity candidates");
            return GatherOutcome::default();
        }

        let kept = self.filter_entities(&candidates, probe).await;
        tracing::debug!(candidates = candidates.len(), kept = kept.len(), "entities selected");

        let mut tasks: JoinSet<Result<BTreeSet<String>, RetrievalError>> = JoinSet::new();
        for entity in &kept {
            let this = self.clone();
            let entity_for_relations = entity.clone();
            let probe_owned = probe.to_string();
            let evidence_for_relations = Arc::clone(evidence);
            tasks.spawn(async move {
                this.gather_relations(&entity_for_relations, &probe_owned, &evidence_for_relations)
                    .await
                    .map_err(|e| {
                        tracing::warn!(kb_id = %entity_for_relations.id, error = %e, "relation retrieval failed");
                        e
                    })
            });

            let retriever = Arc::clone(&self.sources.retriever);
            let entity_for_passages = entity.clone();
            let probe_owned = probe.to_string();
            let evidence_for_passages = Arc::clone(evidence);
            let top_k = self.config.passage_top_k;
            tasks.spawn(async move {
                let passages = retriever
                    .retrieve(&entity_for_passages, &probe_owned, top_k)
                    .await
                    .map_err(|e| {
                        tracing::warn!(kb_id = %entity_for_passages.id, error = %e, "passage retrieval failed");
                        e
                    })?;
                let added = evidence_for_passages.extend_passages(passages);
                tracing::debug!(kb_id = %entity_for_passages.id, added, "passages merged");
                Ok(BTreeSet::new())
            });
        }

        let mut relation_ids = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ids)) => relation_ids.extend(ids),
                Ok(Err(_)) => {}
                Err(e) => tracing::warn!(error = %e, "gather task aborted"),
            }
        }

        GatherOutcome {
            knowledge_ids: kept.into_iter().map(|e| e.id).collect(),
            relation_ids,
        }
    }

    async fn extract_mentions(&self, probe: &str) -> Vec<String> {
        let prompt = prompts::entity_extraction(probe);
        match self.model.complete(&prompt.system, &prompt.user).await {
            Ok(text) => double_quoted(&text),
            Err(e) => {
                tracing::warn!(error = %e, "entity extraction failed");
                Vec::new()
            }
        }
    }

    async fn filter_entities(
        &self,
        candidates: &BTreeMap<String, EntityCandidate>,
        probe: &str,
    ) -> Vec<KnowledgeEntity> {
        let listing = serde_json::to_string(candidates).unwrap_or_default();
        let prompt = prompts::entity_filter(&listing, probe, self.config.entity_top_k);
        let text = match self.model.complete(&prompt.system, &prompt.user).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "entity filter failed");
                return Vec::new();
            }
        };

        single_quoted(&text)
            .into_iter()
            .filter_map(|id| {
                candidates.get(&id).map(|c| KnowledgeEntity {
                    label: c.label.clone(),
                    id,
                })
            })
            .take(self.config.entity_top_k)
            .collect()
    }

    async fn gather_relations(
        &self,
        entity: &KnowledgeEntity,
        probe: &str,
        evidence: &Arc<EvidenceBox>,
    ) -> Result<BTreeSet<String>, RetrievalError> {
        let relations = self.sources.catalog.relations_of(&entity.id).await?;
        if relations.is_empty() {
            return Ok(BTreeSet::new());
        }

        let selected = self.select_relations(&relations, probe).await;
        let chosen_ids: BTreeSet<String> = selected.iter().map(|(_, r)| r.id.clone()).collect();

        let mut lookups = JoinSet::new();
        for (direction, relation) in selected {
            let catalog = Arc::clone(&self.sources.catalog);
            let entity_id = entity.id.clone();
            lookups.spawn(async move {
                let value = catalog.value_of(&entity_id, &relation.id, direction).await;
                (direction, relation, value)
            });
        }

        while let Some(joined) = lookups.join_next().await {
            let (direction, relation, value) = match joined {
                Ok(out) => out,
                Err(e) => {
                    tracing::warn!(error = %e, "value lookup aborted");
                    continue;
                }
            };
            match value {
                Ok(Some(value)) => {
                    let fact = match direction {
                        Direction::Outgoing => {
                            GraphFact::new(&entity.label, &relation.label, value)
                        }
                        Direction::Incoming => {
                            GraphFact::new(value, &relation.label, &entity.label)
                        }
                    };
                    evidence.add_fact(fact);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    kb_id = %entity.id,
                    relation = %relation.id,
                    %direction,
                    error = %e,
                    "value lookup failed"
                ),
            }
        }

        Ok(chosen_ids)
    }

    /// Ask the model for the top relations per direction. Ids the catalog did
    /// not offer are ignored.
    async fn select_relations(
        &self,
        relations: &RelationSet,
        probe: &str,
    ) -> Vec<(Direction, RelationRef)> {
        let outgoing = relation_listing(&relations.outgoing);
        let incoming = relation_listing(&relations.incoming);
        let top_k = self.config.relation_top_k;
        let prompt = prompts::relation_selection(probe, &outgoing, &incoming, top_k);

        let choice: RelationChoice = match self.model.complete_json(&prompt.system, &prompt.user).await {
            Ok(choice) => choice,
            Err(e) => {
                tracing::warn!(error = %e, "relation selection failed");
                return Vec::new();
            }
        };

        let mut picked = Vec::new();
        for (direction, ids) in [
            (Direction::Outgoing, choice.outgoing_relations),
            (Direction::Incoming, choice.incoming_relations),
        ] {
            let found = ids
                .iter()
                .filter_map(|id| relations.find(direction, id))
                .take(top_k)
                .cloned();
            picked.extend(found.map(|r| (direction, r)));
        }
        picked
    }
}

fn relation_listing(relations: &[RelationRef]) -> String {
    let map: BTreeMap<&str, &str> = relations
        .iter()
        .map(|r| (r.id.as_str(), r.label.as_str()))
        .collect();
    serde_json::to_string(&map).unwrap_or_default()
}
