//! Context window management
//!
//! Keeps a run's conversation inside its model's context window.
//!
//! ## Pieces
//!
//! - **Threshold**: `"80%"` of the window or an absolute token count
//! - **Model specs**: context windows resolved through a TTL cache, failing closed
//! - **Monitor**: compares effective ledger usage against the threshold
//! - **Curator**: summarizes the conversation and replaces it with one system message
//!
//! ## Configuration
//!
//! ```toml
//! [engine]
//! cleanup_threshold = "80%"
//!
//! [models."gpt-4o"]
//! context_window = 128000
//! ```

mod config;
mod curator;
mod model_spec;
mod monitor;
mod summary;

pub use config::{CleanupThreshold, parse_cleanup_threshold};
pub use curator::{CURATOR_AGENT, CurationOutcome, MemoryCurator};
pub use model_spec::{
    DEFAULT_CONTEXT_WINDOW, ModelSpecCache, ResolvedWindow, StaticModelSpecs, WindowSource,
};
pub use monitor::{ContextWindowMonitor, WindowUsage, measure};
pub use summary::{AgentDigest, CurationInput, CurationSummary, parse_summary};
