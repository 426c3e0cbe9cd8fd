//! Per-verification evidence accumulator.
//!
//! An [`EvidenceBox`] collects graph triples and document passages while the
//! gatherer's fan-out tasks run. Inserts are idempotent (triples keyed by the
//! triple, passages by id) and safe from concurrent tasks. Once the box is
//! full further inserts are dropped and counted; nothing already stored is
//! ever evicted.

use crate::config::EvidenceLimits;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// A `(head, relation, tail)` triple from the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphFact {
    pub head: String,
    pub relation: String,
    pub tail: String,
}

impl GraphFact {
    pub fn new(
        head: impl Into<String>,
        relation: impl Into<String>,
        tail: impl Into<String>,
    ) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }

    /// `head-relation-tail`, the form used in references.
    pub fn as_reference(&self) -> String {
        format!("{}-{}-{}", self.head, self.relation, self.tail)
    }
}

/// A retrieved document chunk with a stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Result of one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added,
    Duplicate,
    /// Box full; the item was discarded.
    Dropped,
}

#[derive(Debug, Default)]
struct Contents {
    facts: BTreeSet<GraphFact>,
    passages: BTreeMap<String, Passage>,
    dropped: usize,
}

#[derive(Debug)]
pub struct EvidenceBox {
    limits: EvidenceLimits,
    inner: Mutex<Contents>,
}

impl Default for EvidenceBox {
    fn default() -> Self {
        Self::new(EvidenceLimits::default())
    }
}

impl EvidenceBox {
    pub fn new(limits: EvidenceLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Contents::default()),
        }
    }

    pub fn add_fact(&self, fact: GraphFact) -> Insert {
        let mut inner = self.inner.lock();
        if inner.facts.contains(&fact) {
            return Insert::Duplicate;
        }
        if inner.facts.len() >= self.limits.max_graph_facts {
            inner.dropped += 1;
            return Insert::Dropped;
        }
        inner.facts.insert(fact);
        Insert::Added
    }

    pub fn add_passage(&self, passage: Passage) -> Insert {
        // Passages without an id cannot be deduplicated.
        if passage.id.is_empty() {
            return Insert::Dropped;
        }
        let mut inner = self.inner.lock();
        if inner.passages.contains_key(&passage.id) {
            return Insert::Duplicate;
        }
        if inner.passages.len() >= self.limits.max_passages {
            inner.dropped += 1;
            return Insert::Dropped;
        }
        inner.passages.insert(passage.id.clone(), passage);
        Insert::Added
    }

    pub fn extend_facts(&self, facts: impl IntoIterator<Item = GraphFact>) -> usize {
        facts
            .into_iter()
            .filter(|f| self.add_fact(f.clone()) == Insert::Added)
            .count()
    }

    pub fn extend_passages(&self, passages: impl IntoIterator<Item = Passage>) -> usize {
        passages
            .into_iter()
            .filter(|p| self.add_passage(p.clone()) == Insert::Added)
            .count()
    }

    pub fn fact_count(&self) -> usize {
        self.inner.lock().facts.len()
    }

    pub fn passage_count(&self) -> usize {
        self.inner.lock().passages.len()
    }

    /// Total stored items.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.facts.len() + inner.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded because the box was full.
    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }

    pub fn passage(&self, id: &str) -> Option<Passage> {
        self.inner.lock().passages.get(id).cloned()
    }

    pub fn facts(&self) -> Vec<GraphFact> {
        self.inner.lock().facts.iter().cloned().collect()
    }

    pub fn passages(&self) -> Vec<Passage> {
        self.inner.lock().passages.values().cloned().collect()
    }

    /// Prompt rendering. Sorted, so the text does not depend on the order
    /// in which concurrent tasks finished.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::from("textInfo:\n");
        if inner.passages.is_empty() {
            out.push_str("No Information provided.\n");
        }
        for p in inner.passages.values() {
            let _ = writeln!(out, "- id: {} | title: {} | content: {}", p.id, p.title, p.content);
        }
        out.push_str("graphInfo:\n");
        if inner.facts.is_empty() {
            out.push_str("No Information provided.\n");
        }
        for f in &inner.facts {
            let _ = writeln!(out, "- {}", f.as_reference());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str) -> Passage {
        Passage {
            id: id.into(),
            title: "Manru".into(),
            content: format!("content of {id}"),
        }
    }

    #[test]
    fn test_duplicate_fact_is_ignored() {
        let bx = EvidenceBox::default();
        let fact = GraphFact::new("Manru", "composer", "Ignacy Jan Paderewski");
        assert_eq!(bx.add_fact(fact.clone()), Insert::Added);
        assert_eq!(bx.add_fact(fact), Insert::Duplicate);
        assert_eq!(bx.len(), 1);
    }

    #[test]
    fn test_passages_dedupe_by_id_not_content() {
        let bx = EvidenceBox::default();
        bx.add_passage(passage("Manru_0_0"));
        let mut changed = passage("Manru_0_0");
        changed.content = "different".into();
        assert_eq!(bx.add_passage(changed), Insert::Duplicate);
        assert_eq!(bx.passage("Manru_0_0").unwrap().content, "content of Manru_0_0");
    }

    #[test]
    fn test_full_box_drops_without_evicting() {
        let bx = EvidenceBox::new(EvidenceLimits {
            max_graph_facts: 1,
            max_passages: 1,
        });
        bx.add_fact(GraphFact::new("a", "r", "b"));
        assert_eq!(bx.add_fact(GraphFact::new("c", "r", "d")), Insert::Dropped);
        bx.add_passage(passage("p1"));
        assert_eq!(bx.add_passage(passage("p2")), Insert::Dropped);
        assert_eq!(bx.dropped(), 2);
        assert_eq!(bx.facts(), vec![GraphFact::new("a", "r", "b")]);
        assert!(bx.passage("p1").is_some());
    }

    #[test]
    fn test_render_is_order_independent() {
        let a = EvidenceBox::default();
        let b = EvidenceBox::default();
        let f1 = GraphFact::new("x", "r", "y");
        let f2 = GraphFact::new("a", "r", "b");
        a.add_fact(f1.clone());
        a.add_fact(f2.clone());
        b.add_fact(f2);
        b.add_fact(f1);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_empty_box_renders_placeholder() {
        let text = EvidenceBox::default().render();
        assert!(text.contains("No Information provided."));
    }
}
