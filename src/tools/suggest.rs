//! Keyword-overlap scoring of a tool catalog against the current goal.

use super::ParamSchema;
use crate::state::ToolRecommendation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "about", "your", "you", "are",
    "was", "will", "can", "not", "all", "any", "use", "using", "then", "than", "them", "its",
];

/// A tool known to the engine but not necessarily bound in the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub schema: ParamSchema,
}

impl CatalogEntry {
    fn terms(&self) -> BTreeSet<String> {
        let mut terms = tokenize(&self.name);
        terms.extend(tokenize(&self.description));
        for keyword in &self.keywords {
            terms.extend(tokenize(keyword));
        }
        terms
    }
}

/// Lowercased words of three or more characters, minus stopwords.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Score catalog entries against `context` and return at most `top_k`.
///
/// The score is the fraction of an entry's terms that appear in the context.
/// Entries named in `exclude` and entries with no overlap are skipped. Ties are
/// broken by name so the result is deterministic.
pub fn suggest(
    catalog: &[CatalogEntry],
    context: &str,
    exclude: &[&str],
    top_k: usize,
) -> Vec<ToolRecommendation> {
    let context_terms = tokenize(context);
    let mut scored: Vec<ToolRecommendation> = catalog
        .iter()
        .filter(|entry| !exclude.contains(&entry.name.as_str()))
        .filter_map(|entry| {
            let terms = entry.terms();
            if terms.is_empty() {
                return None;
            }
            let matched: Vec<&str> = terms
                .iter()
                .filter(|t| context_terms.contains(*t))
                .map(String::as_str)
                .collect();
            if matched.is_empty() {
                return None;
            }
            Some(ToolRecommendation {
                name: entry.name.clone(),
                description: entry.description.clone(),
                schema: entry.schema.clone(),
                score: matched.len() as f64 / terms.len() as f64,
                reason: format!("matched: {}", matched.join(", ")),
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    scored.truncate(top_k);
    scored
}
