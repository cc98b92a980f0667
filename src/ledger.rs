//! Token usage accounting.
//!
//! [`TokenLedger`] is shared infrastructure: every run records into its own
//! [`RunLedger`] namespace, so concurrent runs never see each other's usage.
//! A run ledger only grows; there is no way to remove or overwrite an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Input/output token totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenTotals {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One recorded usage entry. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheckpoint {
    pub agent_id: String,
    pub model_id: String,
    pub action: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl TokenCheckpoint {
    pub fn totals(&self) -> TokenTotals {
        TokenTotals::new(self.input_tokens, self.output_tokens)
    }
}

/// Append-only usage ledger for a single run.
///
/// Cloning yields another handle onto the same entries.
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    entries: Arc<RwLock<Vec<TokenCheckpoint>>>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a usage entry and return it.
    pub fn record(
        &self,
        agent_id: &str,
        model_id: &str,
        action: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> TokenCheckpoint {
        let entry = TokenCheckpoint {
            agent_id: agent_id.to_string(),
            model_id: model_id.to_string(),
            action: action.to_string(),
            input_tokens,
            output_tokens,
            timestamp: Utc::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        entry
    }

    /// Sum of input + output tokens over every recorded entry.
    pub fn cumulative_total(&self) -> u64 {
        self.read(|entries| entries.iter().map(|e| e.totals().total()).sum())
    }

    /// Aggregate totals over every entry.
    pub fn totals(&self) -> TokenTotals {
        self.read(|entries| {
            let mut totals = TokenTotals::default();
            for entry in entries {
                totals.add(entry.totals());
            }
            totals
        })
    }

    pub fn totals_by_agent(&self) -> BTreeMap<String, TokenTotals> {
        self.read(|entries| group_totals(entries, |e| &e.agent_id))
    }

    pub fn totals_by_model(&self) -> BTreeMap<String, TokenTotals> {
        self.read(|entries| group_totals(entries, |e| &e.model_id))
    }

    pub fn len(&self) -> usize {
        self.read(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, in recording order, for snapshotting.
    pub fn export(&self) -> Vec<TokenCheckpoint> {
        self.read(|entries| entries.to_vec())
    }

    /// Append previously exported entries (e.g. when resuming from a checkpoint).
    pub fn import(&self, entries: impl IntoIterator<Item = TokenCheckpoint>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
    }

    fn read<R>(&self, f: impl FnOnce(&[TokenCheckpoint]) -> R) -> R {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

fn group_totals<'a>(
    entries: &'a [TokenCheckpoint],
    key: impl Fn(&'a TokenCheckpoint) -> &'a String,
) -> BTreeMap<String, TokenTotals> {
    let mut grouped: BTreeMap<String, TokenTotals> = BTreeMap::new();
    for entry in entries {
        grouped.entry(key(entry).clone()).or_default().add(entry.totals());
    }
    grouped
}

/// Process-wide ledger registry, namespaced by run id.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    runs: Arc<RwLock<HashMap<String, RunLedger>>>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger for `run_id`, created on first use.
    pub fn for_run(&self, run_id: &str) -> RunLedger {
        if let Some(ledger) = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
        {
            return ledger.clone();
        }
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the registry's handle for a finished run. Outstanding handles keep working.
    pub fn release(&self, run_id: &str) -> Option<RunLedger> {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(run_id)
    }

    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
