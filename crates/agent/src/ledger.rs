//! Execution ledger — the append-only per-run record of steps.
//!
//! One entry per agent-loop step (and per continuation step, tagged with the
//! verification pass). The ledger is transient run evidence for the
//! verifier, not long-term storage: it is finalized when the run produces
//! its answer and cleared afterwards. Tool results are deliberately not
//! recorded; the assistant's own narration is the evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use taskforge_core::message::MessageToolCall;

/// Progress digests keep the first line of the message, truncated.
const DIGEST_MAX_CHARS: usize = 200;

/// One agent-loop step as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Step ordinal within the run, 1-based.
    pub step: u32,

    pub timestamp: DateTime<Utc>,

    /// The assistant's text for this turn.
    pub content: String,

    /// Tool calls the assistant requested this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Short progress digest extracted from the content.
    pub digest: String,

    /// Set when this step ran inside a verification continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_pass: Option<u32>,
}

impl ExecutionStep {
    pub fn new(step: u32, content: &str, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            step,
            timestamp: Utc::now(),
            content: content.to_string(),
            tool_calls,
            digest: progress_digest(content),
            verification_pass: None,
        }
    }

    pub fn during_verification(mut self, pass: u32) -> Self {
        self.verification_pass = Some(pass);
        self
    }
}

/// The full per-run ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<ExecutionStep>,

    /// Final verdict status, recorded at finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_status: Option<String>,

    /// Final confidence, recorded at finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_confidence: Option<u8>,
}

impl RunLedger {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            steps: Vec::new(),
            final_status: None,
            final_confidence: None,
        }
    }
}

/// Where run ledgers live. In-memory by default; the trait keeps the agent
/// loop free of any particular storage medium.
pub trait LedgerStore: Send + Sync {
    /// Append one step to the run's ledger, creating the ledger on first
    /// append.
    fn append(&self, run_id: &str, step: ExecutionStep);

    /// A point-in-time copy of the run's ledger.
    fn snapshot(&self, run_id: &str) -> Option<RunLedger>;

    /// Record the run's final status and confidence.
    fn finalize(&self, run_id: &str, status: &str, confidence: u8);

    /// Drop the run's ledger from live memory.
    fn clear(&self, run_id: &str);
}

/// The default store: a mutex-guarded map of run id to ledger.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    runs: Mutex<HashMap<String, RunLedger>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&self, run_id: &str, step: ExecutionStep) {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.entry(run_id.to_string())
            .or_insert_with(|| RunLedger::new(run_id))
            .steps
            .push(step);
    }

    fn snapshot(&self, run_id: &str) -> Option<RunLedger> {
        let runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.get(run_id).cloned()
    }

    fn finalize(&self, run_id: &str, status: &str, confidence: u8) {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(ledger) = runs.get_mut(run_id) {
            ledger.final_status = Some(status.to_string());
            ledger.final_confidence = Some(confidence);
        }
    }

    fn clear(&self, run_id: &str) {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.remove(run_id);
    }
}

/// The first line of the text, truncated on a char boundary.
pub fn progress_digest(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    line.chars().take(DIGEST_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_ledger_on_first_use() {
        let store = InMemoryLedgerStore::new();
        assert!(store.snapshot("run-1").is_none());

        store.append("run-1", ExecutionStep::new(1, "Listing files", vec![]));
        store.append("run-1", ExecutionStep::new(2, "Reading a.txt", vec![]));

        let ledger = store.snapshot("run-1").unwrap();
        assert_eq!(ledger.steps.len(), 2);
        assert_eq!(ledger.steps[0].digest, "Listing files");
    }

    #[test]
    fn finalize_then_clear() {
        let store = InMemoryLedgerStore::new();
        store.append("run-1", ExecutionStep::new(1, "working", vec![]));
        store.finalize("run-1", "complete", 97);

        let ledger = store.snapshot("run-1").unwrap();
        assert_eq!(ledger.final_status.as_deref(), Some("complete"));
        assert_eq!(ledger.final_confidence, Some(97));

        store.clear("run-1");
        assert!(store.snapshot("run-1").is_none());
    }

    #[test]
    fn runs_are_isolated() {
        let store = InMemoryLedgerStore::new();
        store.append("run-a", ExecutionStep::new(1, "a", vec![]));
        store.append("run-b", ExecutionStep::new(1, "b", vec![]));

        assert_eq!(store.snapshot("run-a").unwrap().steps.len(), 1);
        store.clear("run-a");
        assert!(store.snapshot("run-b").is_some());
    }

    #[test]
    fn digest_is_first_line_truncated() {
        assert_eq!(progress_digest("line one\nline two"), "line one");
        let long = "x".repeat(500);
        assert_eq!(progress_digest(&long).chars().count(), DIGEST_MAX_CHARS);
        assert_eq!(progress_digest(""), "");
    }

    #[test]
    fn verification_steps_carry_the_pass() {
        let step = ExecutionStep::new(7, "continuing", vec![]).during_verification(2);
        assert_eq!(step.verification_pass, Some(2));
    }
}
