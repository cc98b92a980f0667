//! Model context-window resolution with a TTL cache.

use crate::collab::{ModelSpecSource, with_timeout};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Window assumed when a model's spec cannot be resolved.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 8_192;

/// Where a resolved window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSource {
    Cache,
    Source,
    /// The lookup failed or the model is unknown.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub tokens: u64,
    pub source: WindowSource,
}

/// Caches context windows from a [`ModelSpecSource`].
///
/// Entries expire after `ttl`. Failed lookups are never cached; they fall back
/// to the default window so a flaky source cannot disable cleanup.
pub struct ModelSpecCache {
    source: Arc<dyn ModelSpecSource>,
    entries: RwLock<HashMap<String, (u64, Instant)>>,
    ttl: Duration,
    lookup_timeout: Duration,
    default_window: u64,
}

impl ModelSpecCache {
    pub fn new(source: Arc<dyn ModelSpecSource>, ttl: Duration) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            ttl,
            lookup_timeout: Duration::from_secs(10),
            default_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    pub fn with_default_window(mut self, tokens: u64) -> Self {
        self.default_window = tokens;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn default_window(&self) -> u64 {
        self.default_window
    }

    pub async fn resolve(&self, model: &str) -> ResolvedWindow {
        if let Some((tokens, at)) = self.entries.read().await.get(model)
            && at.elapsed() < self.ttl
        {
            return ResolvedWindow {
                tokens: *tokens,
                source: WindowSource::Cache,
            };
        }

        let lookup = with_timeout(
            "model spec lookup",
            self.lookup_timeout,
            self.source.context_window(model),
        )
        .await;

        match lookup {
            Ok(Some(tokens)) if tokens > 0 => {
                self.entries
                    .write()
                    .await
                    .insert(model.to_string(), (tokens, Instant::now()));
                ResolvedWindow {
                    tokens,
                    source: WindowSource::Source,
                }
            }
            Ok(_) => {
                tracing::warn!(model, default = self.default_window, "Unknown model window, using default");
                self.fallback()
            }
            Err(e) => {
                tracing::warn!(model, error = %e, "Model spec lookup failed, using default window");
                self.fallback()
            }
        }
    }

    pub async fn invalidate(&self, model: &str) {
        self.entries.write().await.remove(model);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn fallback(&self) -> ResolvedWindow {
        ResolvedWindow {
            tokens: self.default_window,
            source: WindowSource::Fallback,
        }
    }
}

/// Context windows from the `[models.<id>]` config tables.
#[derive(Debug, Clone, Default)]
pub struct StaticModelSpecs {
    windows: HashMap<String, u64>,
}

impl StaticModelSpecs {
    pub fn new(windows: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            windows: windows.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ModelSpecSource for StaticModelSpecs {
    async fn context_window(
        &self,
        model: &str,
    ) -> Result<Option<u64>, crate::errors::CollaboratorError> {
        Ok(self.windows.get(model).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::MockModelSpecs;

    #[tokio::test]
    async fn test_resolve_caches_within_ttl() {
        let specs = MockModelSpecs::new().with_window("m", 8_000);
        let cache = ModelSpecCache::new(Arc::new(specs.clone()), Duration::from_secs(60));

        let first = cache.resolve("m").await;
        let second = cache.resolve("m").await;
        assert_eq!(first.tokens, 8_000);
        assert_eq!(first.source, WindowSource::Source);
        assert_eq!(second.source, WindowSource::Cache);
        assert_eq!(specs.lookups(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let specs = MockModelSpecs::new().with_window("m", 8_000);
        let cache = ModelSpecCache::new(Arc::new(specs.clone()), Duration::ZERO);
        cache.resolve("m").await;
        cache.resolve("m").await;
        assert_eq!(specs.lookups(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let specs = MockModelSpecs::new().with_window("m", 8_000);
        let cache = ModelSpecCache::new(Arc::new(specs.clone()), Duration::from_secs(60));
        cache.resolve("m").await;
        cache.invalidate("m").await;
        assert_eq!(cache.resolve("m").await.source, WindowSource::Source);
        assert_eq!(specs.lookups(), 2);
    }

    #[tokio::test]
    async fn test_failing_source_falls_back_without_caching() {
        let specs = MockModelSpecs::failing();
        let cache = ModelSpecCache::new(Arc::new(specs.clone()), Duration::from_secs(60))
            .with_default_window(4_096);
        let resolved = cache.resolve("m").await;
        assert_eq!(resolved.tokens, 4_096);
        assert_eq!(resolved.source, WindowSource::Fallback);
        cache.resolve("m").await;
        assert_eq!(specs.lookups(), 2);
    }

    #[tokio::test]
    async fn test_unknown_model_uses_default() {
        let cache = ModelSpecCache::new(Arc::new(StaticModelSpecs::default()), Duration::from_secs(60));
        assert_eq!(cache.resolve("nope").await.tokens, DEFAULT_CONTEXT_WINDOW);
    }

    #[tokio::test]
    async fn test_static_specs() {
        let specs = StaticModelSpecs::new([("gpt-4o".to_string(), 128_000)]);
        assert_eq!(specs.context_window("gpt-4o").await.unwrap(), Some(128_000));
    }
}
