//! Typed error hierarchy for the baton orchestrator.
//!
//! Top-level enums by subsystem:
//! - `OrchestratorError`: failures that abort a run (configuration, checkpoint I/O)
//! - `CollaboratorError`: failures of external calls; recovered into the conversation
//! - `CheckpointError`: checkpoint store failures
//! - `TrackerError`: run lifecycle failures
//! - `SummarizationError`: summarizer output that cannot drive a memory wipe

use thiserror::Error;

/// Errors that abort a run. Everything else is folded back into the conversation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Checkpoint I/O failed: {0}")]
    CheckpointIo(#[from] CheckpointError),

    #[error("Run tracking failed: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: String },

    #[error("No checkpoint found for thread {thread_id}")]
    NothingToResume { thread_id: String },

    #[error("Thread {thread_id} already ran to completion")]
    ThreadFinished { thread_id: String },

    #[error("Thread {thread_id} stopped mid-run; resume it before starting a new goal")]
    ThreadInProgress { thread_id: String },

    #[error("Checkpoint snapshot for thread {thread_id} is unreadable: {message}")]
    CorruptSnapshot { thread_id: String, message: String },
}

/// Failures of a call to an external collaborator (inference, tool, agent, memory).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an undecodable response: {message}")]
    Decode { operation: String, message: String },

    #[error("{operation} reported an error: {message}")]
    Remote { operation: String, message: String },
}

impl CollaboratorError {
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Checkpoint store failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint {checkpoint_id} already exists in thread {thread_id}")]
    AlreadyExists {
        thread_id: String,
        checkpoint_id: String,
    },

    #[error("Invalid thread id '{0}'")]
    InvalidThreadId(String),

    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint record could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Checkpoint {operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

/// Run lifecycle failures.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("Run {0} already exists")]
    DuplicateRun(String),

    #[error("Run store I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run record could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Summarizer output that cannot be used for a memory wipe.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SummarizationError {
    #[error("summarizer call failed: {0}")]
    Call(#[from] CollaboratorError),

    #[error("no JSON object found in summarizer output")]
    NoJson,

    #[error("summarizer JSON is invalid: {0}")]
    InvalidJson(String),

    #[error("summarizer JSON is missing a non-empty '{0}' field")]
    MissingField(&'static str),
}
