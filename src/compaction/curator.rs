//! Summarize-then-wipe memory curation.

use super::summary::{CurationInput, CurationSummary, parse_summary};
use crate::collab::{
    InferenceClient, InferenceRequest, LongTermMemory, MemoryEntry, with_timeout,
};
use crate::errors::SummarizationError;
use crate::ledger::RunLedger;
use crate::state::{Message, OrchestrationState, StateUpdate};
use crate::util::estimate_tokens;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Ledger agent id for summarizer usage.
pub const CURATOR_AGENT: &str = "curator";

/// What a curation attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum CurationOutcome {
    /// `needs_cleanup` was not set.
    Skipped,
    /// The summarizer failed or returned unusable output. Messages are untouched.
    Aborted { error: SummarizationError },
    Wiped {
        summary: CurationSummary,
        wiped_messages: usize,
        memory_persisted: bool,
        update: StateUpdate,
    },
}

pub struct MemoryCurator {
    inference: Arc<dyn InferenceClient>,
    memory: Arc<dyn LongTermMemory>,
    model: String,
    summarize_timeout: Duration,
    memory_timeout: Duration,
}

impl MemoryCurator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        memory: Arc<dyn LongTermMemory>,
        model: &str,
    ) -> Self {
        Self {
            inference,
            memory,
            model: model.to_string(),
            summarize_timeout: Duration::from_secs(120),
            memory_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, summarize: Duration, memory: Duration) -> Self {
        self.summarize_timeout = summarize;
        self.memory_timeout = memory;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn curate(&self, state: &OrchestrationState, ledger: &RunLedger) -> CurationOutcome {
        if !state.needs_cleanup {
            return CurationOutcome::Skipped;
        }

        let prompt = CurationInput::from_state(state).to_prompt();
        let prompt_tokens: u64 = prompt.iter().map(|m| estimate_tokens(&m.content)).sum();
        let request = InferenceRequest {
            model: self.model.clone(),
            messages: prompt,
            temperature: 0.0,
        };

        let response = match with_timeout(
            "summarize",
            self.summarize_timeout,
            self.inference.complete(&request),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(run_id = %state.run_id, error = %e, "Summarizer call failed, skipping wipe");
                return CurationOutcome::Aborted { error: e.into() };
            }
        };

        let usage = response.usage.unwrap_or_else(|| {
            crate::ledger::TokenTotals::new(prompt_tokens, estimate_tokens(&response.content))
        });
        ledger.record(
            CURATOR_AGENT,
            &self.model,
            "summarize",
            usage.input_tokens,
            usage.output_tokens,
        );

        let summary = match parse_summary(&response.content) {
            Ok(summary) => summary,
            Err(error) => {
                tracing::warn!(run_id = %state.run_id, %error, "Summarizer output unusable, skipping wipe");
                return CurationOutcome::Aborted { error };
            }
        };

        let wiped_messages = state.messages.len();
        let memory_persisted = self.persist(state, &summary, wiped_messages).await;

        let message = summary.to_system_message(&state.active_goal, wiped_messages);
        let baseline = ledger
            .cumulative_total()
            .saturating_sub(estimate_tokens(&message.content));
        let wipe_count = state.wipe_count + 1;

        let mut update = StateUpdate::new()
            .replace_messages(vec![message])
            .with_needs_cleanup(false)
            .with_enhancement(format!(
                "memory wipe #{}: {} message(s) summarized",
                wipe_count, wiped_messages
            ));
        update.last_summary = Some(summary.summary.clone());
        update.preserved_facts = Some(summary.key_facts.clone());
        update.context_baseline = Some(baseline);
        update.wipe_count = Some(wipe_count);

        tracing::info!(
            run_id = %state.run_id,
            wiped_messages,
            key_facts = summary.key_facts.len(),
            "Memory wiped"
        );

        CurationOutcome::Wiped {
            summary,
            wiped_messages,
            memory_persisted,
            update,
        }
    }

    /// Write the summary to long-term memory. Failures are logged, not fatal.
    async fn persist(
        &self,
        state: &OrchestrationState,
        summary: &CurationSummary,
        wiped_messages: usize,
    ) -> bool {
        let entry = MemoryEntry {
            messages: vec![Message::system(summary.summary.clone())],
            agent_id: state.workflow_id.clone(),
            run_id: state.run_id.clone(),
            metadata: json!({
                "kind": "memory-wipe",
                "summary": summary.summary,
                "keyFacts": summary.key_facts,
                "wipedMessageCount": wiped_messages,
            }),
        };
        match with_timeout("memory add", self.memory_timeout, self.memory.add(&entry)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(run_id = %state.run_id, error = %e, "Long-term memory write failed");
                false
            }
        }
    }
}
