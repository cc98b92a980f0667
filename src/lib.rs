//! baton: a workflow orchestration engine.
//!
//! A coordinator model works toward a goal by calling tools and sub-agents.
//! The engine runs it as a bounded state machine, accounts for every token,
//! summarizes and wipes the conversation when the context window fills up,
//! and checkpoints after each step so a run can be resumed.

pub mod checkpoint;
pub mod collab;
pub mod compaction;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod runs;
pub mod state;
pub mod tools;
pub mod util;
pub mod workflow;

pub use orchestrator::{Orchestrator, RunOutcome};
