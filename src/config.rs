//! Configuration for baton.
//!
//! Settings are read from `.baton/baton.toml` in the project directory, falling
//! back to `baton/baton.toml` under the user's config directory. Environment
//! variables (`BATON_*`) override the file, and CLI flags override both.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! cleanup_threshold = "80%"
//! max_round_trips = 8
//! max_coordinator_retries = 2
//! suggestion_top_k = 3
//!
//! [timeouts]
//! inference_secs = 120
//! tool_secs = 60
//!
//! [collaborators]
//! base_url = "http://localhost:8080"
//! inference_path = "/inference"
//!
//! [models."gpt-4o"]
//! context_window = 128000
//! input_per_1k = 0.0025
//! output_per_1k = 0.01
//!
//! [storage]
//! checkpoint_dir = ".baton/checkpoints"
//! runs_dir = ".baton/runs"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use crate::compaction::{DEFAULT_CONTEXT_WINDOW, StaticModelSpecs, parse_cleanup_threshold};
use crate::orchestrator::{EngineSettings, Limits, ModelRates, Timeouts};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project configuration directory.
pub const BATON_DIR: &str = ".baton";
pub const CONFIG_FILE: &str = "baton.toml";

/// Engine defaults. Workflows may override the threshold and the round-trip cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Percentage ("80%") or absolute token count ("6000")
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: String,
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,
    #[serde(default = "default_max_coordinator_retries")]
    pub max_coordinator_retries: u32,
    #[serde(default = "default_suggestion_top_k")]
    pub suggestion_top_k: usize,
    /// Long-term memory hits pulled in on the first pass (0 disables)
    #[serde(default = "default_memory_search_limit")]
    pub memory_search_limit: usize,
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,
    /// Window assumed when a model's spec cannot be resolved
    #[serde(default = "default_context_window")]
    pub default_context_window: u64,
    #[serde(default = "default_model_spec_ttl_secs")]
    pub model_spec_ttl_secs: u64,
}

fn default_cleanup_threshold() -> String {
    "80%".to_string()
}

fn default_max_round_trips() -> u32 {
    Limits::default().max_round_trips
}

fn default_max_coordinator_retries() -> u32 {
    Limits::default().max_coordinator_retries
}

fn default_suggestion_top_k() -> usize {
    3
}

fn default_memory_search_limit() -> usize {
    3
}

fn default_max_observation_chars() -> usize {
    4_000
}

fn default_context_window() -> u64 {
    DEFAULT_CONTEXT_WINDOW
}

fn default_model_spec_ttl_secs() -> u64 {
    600
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            cleanup_threshold: default_cleanup_threshold(),
            max_round_trips: default_max_round_trips(),
            max_coordinator_retries: default_max_coordinator_retries(),
            suggestion_top_k: default_suggestion_top_k(),
            memory_search_limit: default_memory_search_limit(),
            max_observation_chars: default_max_observation_chars(),
            default_context_window: default_context_window(),
            model_spec_ttl_secs: default_model_spec_ttl_secs(),
        }
    }
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_inference_secs")]
    pub inference_secs: u64,
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
    #[serde(default = "default_agent_secs")]
    pub agent_secs: u64,
    #[serde(default = "default_summarize_secs")]
    pub summarize_secs: u64,
    #[serde(default = "default_memory_secs")]
    pub memory_secs: u64,
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: u64,
    #[serde(default = "default_model_spec_secs")]
    pub model_spec_secs: u64,
}

fn default_inference_secs() -> u64 {
    120
}

fn default_tool_secs() -> u64 {
    60
}

fn default_agent_secs() -> u64 {
    300
}

fn default_summarize_secs() -> u64 {
    120
}

fn default_memory_secs() -> u64 {
    15
}

fn default_checkpoint_secs() -> u64 {
    10
}

fn default_model_spec_secs() -> u64 {
    5
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            inference_secs: default_inference_secs(),
            tool_secs: default_tool_secs(),
            agent_secs: default_agent_secs(),
            summarize_secs: default_summarize_secs(),
            memory_secs: default_memory_secs(),
            checkpoint_secs: default_checkpoint_secs(),
            model_spec_secs: default_model_spec_secs(),
        }
    }
}

impl TimeoutsSection {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            inference: Duration::from_secs(self.inference_secs),
            tool: Duration::from_secs(self.tool_secs),
            agent: Duration::from_secs(self.agent_secs),
            summarize: Duration::from_secs(self.summarize_secs),
            memory: Duration::from_secs(self.memory_secs),
            checkpoint: Duration::from_secs(self.checkpoint_secs),
        }
    }
}

/// Where the HTTP collaborators live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorsSection {
    /// Base URL serving `/inference`, `/tool/{id}`, `/agent/{id}/chat` and `/memory/*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_inference_path")]
    pub inference_path: String,
    /// Whether the memory endpoints exist; a no-op memory is used otherwise
    #[serde(default = "default_memory_enabled")]
    pub memory_enabled: bool,
}

fn default_inference_path() -> String {
    "/inference".to_string()
}

fn default_memory_enabled() -> bool {
    true
}

impl Default for CollaboratorsSection {
    fn default() -> Self {
        Self {
            base_url: None,
            inference_path: default_inference_path(),
            memory_enabled: default_memory_enabled(),
        }
    }
}

/// A model's window and pricing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(BATON_DIR).join("checkpoints")
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from(BATON_DIR).join("runs")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            runs_dir: default_runs_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Daily-rolling log file, in addition to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// The complete baton.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatonToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub collaborators: CollaboratorsSection,
    /// Per-model window and pricing, keyed by model id
    #[serde(default)]
    pub models: BTreeMap<String, ModelSection>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl BatonToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse baton.toml")
    }

    /// Load `<baton_dir>/baton.toml`, or defaults when it does not exist.
    pub fn load_or_default(baton_dir: &Path) -> Result<Self> {
        let config_path = baton_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize baton.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `BATON_*` overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("BATON_BASE_URL") {
            self.collaborators.base_url = Some(url);
        }
        if let Some(threshold) = lookup("BATON_CLEANUP_THRESHOLD") {
            self.engine.cleanup_threshold = threshold;
        }
        if let Some(max) = lookup("BATON_MAX_ROUND_TRIPS") {
            self.engine.max_round_trips = max
                .parse()
                .with_context(|| format!("BATON_MAX_ROUND_TRIPS is not a number: {}", max))?;
        }
        if let Some(level) = lookup("BATON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("BATON_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Resolve engine settings. Fails on an unparseable threshold.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let cleanup_threshold = parse_cleanup_threshold(&self.engine.cleanup_threshold)
            .context("Invalid [engine] cleanup_threshold")?;
        let pricing = self
            .models
            .iter()
            .map(|(id, model)| {
                (
                    id.clone(),
                    ModelRates {
                        input_per_1k: model.input_per_1k,
                        output_per_1k: model.output_per_1k,
                    },
                )
            })
            .collect();
        Ok(EngineSettings {
            limits: Limits {
                max_round_trips: self.engine.max_round_trips,
                max_coordinator_retries: self.engine.max_coordinator_retries,
            },
            cleanup_threshold,
            timeouts: self.timeouts.to_timeouts(),
            suggestion_top_k: self.engine.suggestion_top_k,
            memory_search_limit: self.engine.memory_search_limit,
            max_observation_chars: self.engine.max_observation_chars,
            pricing,
        })
    }

    /// Model windows declared under `[models.<id>]`.
    pub fn model_specs(&self) -> StaticModelSpecs {
        StaticModelSpecs::new(
            self.models
                .iter()
                .filter_map(|(id, model)| model.context_window.map(|w| (id.clone(), w))),
        )
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = parse_cleanup_threshold(&self.engine.cleanup_threshold) {
            warnings.push(format!(
                "Invalid cleanup_threshold '{}': {}",
                self.engine.cleanup_threshold, e
            ));
        }
        if self.engine.max_round_trips == 0 {
            warnings.push("max_round_trips is 0: tool calls will never run".to_string());
        }
        if self.engine.default_context_window == 0 {
            warnings.push("default_context_window must be positive".to_string());
        }
        if self.collaborators.base_url.is_none() {
            warnings.push(
                "No [collaborators] base_url set (or BATON_BASE_URL): runs cannot reach a backend"
                    .to_string(),
            );
        }
        if !self.collaborators.inference_path.starts_with('/') {
            warnings.push(format!(
                "inference_path '{}' should start with '/'",
                self.collaborators.inference_path
            ));
        }
        for (id, model) in &self.models {
            if model.context_window == Some(0) {
                warnings.push(format!("Model '{}' has a zero context_window", id));
            }
            if model.input_per_1k < 0.0 || model.output_per_1k < 0.0 {
                warnings.push(format!("Model '{}' has a negative price", id));
            }
        }
        for (name, secs) in [
            ("inference_secs", self.timeouts.inference_secs),
            ("tool_secs", self.timeouts.tool_secs),
            ("agent_secs", self.timeouts.agent_secs),
            ("summarize_secs", self.timeouts.summarize_secs),
            ("memory_secs", self.timeouts.memory_secs),
            ("checkpoint_secs", self.timeouts.checkpoint_secs),
            ("model_spec_secs", self.timeouts.model_spec_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("Timeout {} is 0: every call will time out", name));
            }
        }

        warnings
    }
}

/// Configuration resolved for a project directory.
#[derive(Debug, Clone)]
pub struct BatonConfig {
    pub project_dir: PathBuf,
    pub baton_dir: PathBuf,
    /// File the settings came from, if any
    pub source: Option<PathBuf>,
    pub toml: BatonToml,
}

impl BatonConfig {
    /// Load project config, then the global one, then defaults; apply env overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let baton_dir = project_dir.join(BATON_DIR);
        let project_file = baton_dir.join(CONFIG_FILE);
        let global_file = global_config_path();

        let (source, mut toml) = if project_file.exists() {
            (Some(project_file.clone()), BatonToml::load(&project_file)?)
        } else if let Some(global) = global_file.filter(|p| p.exists()) {
            let toml = BatonToml::load(&global)?;
            (Some(global), toml)
        } else {
            (None, BatonToml::default())
        };
        toml.apply_env(|key| std::env::var(key).ok())?;

        Ok(Self {
            project_dir,
            baton_dir,
            source,
            toml,
        })
    }

    /// Path of the project config file, whether or not it exists.
    pub fn project_file(&self) -> PathBuf {
        self.baton_dir.join(CONFIG_FILE)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.resolve(&self.toml.storage.checkpoint_dir)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.resolve(&self.toml.storage.runs_dir)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.toml.logging.file.as_ref().map(|f| self.resolve(f))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

/// `<config dir>/baton/baton.toml`, when the platform has a config dir.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("baton").join(CONFIG_FILE))
}
