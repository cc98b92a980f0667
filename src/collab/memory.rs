//! Local long-term memory backends.

use super::{LongTermMemory, MemoryEntry, MemoryQuery, MemoryRecord};
use crate::errors::CollaboratorError;
use crate::tools::suggest::tokenize;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Used when no memory backend is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopLongTerm;

#[async_trait]
impl LongTermMemory for NoopLongTerm {
    async fn add(&self, _entry: &MemoryEntry) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn search(&self, _query: &MemoryQuery) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: MemoryEntry,
    text: String,
    terms: BTreeSet<String>,
}

/// Process-local memory ranked by keyword overlap. Oldest entries are evicted
/// once `max_entries` is reached.
#[derive(Debug, Clone)]
pub struct InMemoryLongTerm {
    store: Arc<RwLock<Vec<StoredEntry>>>,
    max_entries: usize,
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored entry, oldest first.
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.store.read().await.iter().map(|s| s.entry.clone()).collect()
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl LongTermMemory for InMemoryLongTerm {
    async fn add(&self, entry: &MemoryEntry) -> Result<(), CollaboratorError> {
        let text = entry
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let terms = tokenize(&text);
        let mut store = self.store.write().await;
        store.push(StoredEntry {
            entry: entry.clone(),
            text,
            terms,
        });
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        let query_terms = tokenize(&query.query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.store.read().await;
        let mut scored: Vec<(usize, &StoredEntry)> = store
            .iter()
            .filter(|s| s.entry.agent_id == query.agent_id)
            .filter(|s| query.run_id.as_ref().is_none_or(|r| *r == s.entry.run_id))
            .map(|s| (query_terms.intersection(&s.terms).count(), s))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(score, s)| MemoryRecord {
                content: s.text.clone(),
                score: Some(score as f64 / query_terms.len() as f64),
                metadata: s.entry.metadata.clone(),
            })
            .collect())
    }
}
