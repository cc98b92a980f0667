//! Context window pressure tracking.

use super::config::CleanupThreshold;
use super::model_spec::{ModelSpecCache, WindowSource};
use serde::Serialize;
use std::sync::Arc;

/// Result of one window check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowUsage {
    pub model: String,
    pub window: u64,
    pub tokens_used: u64,
    pub usage_percent: f64,
    pub threshold: String,
    pub needs_cleanup: bool,
    pub window_from_fallback: bool,
}

impl std::fmt::Display for WindowUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} tokens ({:.1}%, threshold {})",
            self.tokens_used, self.window, self.usage_percent, self.threshold
        )
    }
}

/// Compares token usage against a model's window.
#[derive(Clone)]
pub struct ContextWindowMonitor {
    specs: Arc<ModelSpecCache>,
}

impl ContextWindowMonitor {
    pub fn new(specs: Arc<ModelSpecCache>) -> Self {
        Self { specs }
    }

    pub async fn evaluate(
        &self,
        model: &str,
        tokens_used: u64,
        threshold: CleanupThreshold,
    ) -> WindowUsage {
        let resolved = self.specs.resolve(model).await;
        let usage = measure(model, tokens_used, resolved.tokens, threshold);
        WindowUsage {
            window_from_fallback: resolved.source == WindowSource::Fallback,
            ..usage
        }
    }
}

/// Pure usage computation for a known window.
pub fn measure(model: &str, tokens_used: u64, window: u64, threshold: CleanupThreshold) -> WindowUsage {
    let usage_percent = if window == 0 {
        100.0
    } else {
        tokens_used as f64 / window as f64 * 100.0
    };
    WindowUsage {
        model: model.to_string(),
        window,
        tokens_used,
        usage_percent,
        threshold: threshold.to_string(),
        needs_cleanup: threshold.is_reached(tokens_used, window),
        window_from_fallback: false,
    }
}
