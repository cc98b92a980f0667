//! Resolved engine settings.

use super::machine::Limits;
use crate::compaction::CleanupThreshold;
use crate::ledger::TokenTotals;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-call timeouts for every external interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub inference: Duration,
    pub tool: Duration,
    pub agent: Duration,
    pub summarize: Duration,
    pub memory: Duration,
    pub checkpoint: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            inference: Duration::from_secs(120),
            tool: Duration::from_secs(60),
            agent: Duration::from_secs(300),
            summarize: Duration::from_secs(120),
            memory: Duration::from_secs(15),
            checkpoint: Duration::from_secs(10),
        }
    }
}

/// USD per thousand tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    #[serde(default)]
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
}

impl ModelRates {
    pub fn cost(&self, totals: TokenTotals) -> f64 {
        (totals.input_tokens as f64 * self.input_per_1k
            + totals.output_tokens as f64 * self.output_per_1k)
            / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub limits: Limits,
    pub cleanup_threshold: CleanupThreshold,
    pub timeouts: Timeouts,
    /// Suggested tools kept by tool-boxing.
    pub suggestion_top_k: usize,
    /// Long-term memory hits pulled in on the first pass; 0 disables the search.
    pub memory_search_limit: usize,
    /// Longest tool observation kept in the conversation.
    pub max_observation_chars: usize,
    /// Rates by model id. Unpriced models cost nothing.
    pub pricing: BTreeMap<String, ModelRates>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            cleanup_threshold: CleanupThreshold::default(),
            timeouts: Timeouts::default(),
            suggestion_top_k: 3,
            memory_search_limit: 3,
            max_observation_chars: 4_000,
            pricing: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    /// Apply a workflow's overrides on top of these defaults.
    pub fn for_workflow(&self, workflow: &Workflow) -> Self {
        let mut settings = self.clone();
        if let Some(threshold) = workflow.cleanup_threshold {
            settings.cleanup_threshold = threshold;
        }
        if let Some(max) = workflow.max_round_trips {
            settings.limits.max_round_trips = max;
        }
        settings
    }

    pub fn cost_usd(&self, by_model: &BTreeMap<String, TokenTotals>) -> f64 {
        by_model
            .iter()
            .filter_map(|(model, totals)| self.pricing.get(model).map(|r| r.cost(*totals)))
            .sum()
    }
}
