//! Run-scoped mutable state for one agent run.
//!
//! A [`RunContext`] lives for exactly one run and is owned by the runner.
//! Cancellation and progress reporting live elsewhere; this is the
//! bookkeeping side: step counter, attempt log, dedup set, plan.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use taskforge_core::provider::Usage;
use taskforge_core::tool::ContentBlock;

use crate::planner::TaskPlan;

/// One execution attempt of one tool call. Append-only.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    /// The tool-call identity this attempt belongs to.
    pub call_id: String,

    /// Tool name.
    pub tool_name: String,

    /// Attempt ordinal, 1-based.
    pub attempt: u32,

    /// Arguments used for this attempt.
    pub arguments: serde_json::Value,

    /// Whether the attempt succeeded.
    pub success: bool,

    /// Error text when the attempt failed.
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// The single mutable state object for one run.
#[derive(Debug)]
pub struct RunContext {
    /// Run identifier, shared with the ledger and events.
    pub run_id: String,

    /// The user's original query.
    pub query: String,

    /// Hard upper bound on agent-loop steps, shared between the initial
    /// loop and all verification continuations.
    pub step_budget: u32,

    /// Current step ordinal. Monotonically non-decreasing; the sole gate
    /// for the step budget.
    pub current_step: u32,

    /// Every tool execution attempt, across all steps and retries.
    pub attempts: Vec<ExecutionAttempt>,

    /// Tool-call identities already resolved this run. An identity in this
    /// set is never dispatched again.
    pub resolved_call_ids: HashSet<String>,

    /// Planner output, when planning ran.
    pub plan: Option<TaskPlan>,

    /// Names of tools that actually executed, in first-use order.
    pub tools_used: Vec<String>,

    /// Content blocks produced by tool executions.
    pub artifacts: Vec<ContentBlock>,

    /// Accumulated token usage across all model calls.
    pub usage: Usage,

    /// Free-form progress notes, one per step.
    pub progress: Vec<String>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, query: impl Into<String>, step_budget: u32) -> Self {
        Self {
            run_id: run_id.into(),
            query: query.into(),
            step_budget,
            current_step: 0,
            attempts: Vec::new(),
            resolved_call_ids: HashSet::new(),
            plan: None,
            tools_used: Vec::new(),
            artifacts: Vec::new(),
            usage: Usage::default(),
            progress: Vec::new(),
        }
    }

    /// Steps left before the budget is exhausted.
    pub fn remaining_steps(&self) -> u32 {
        self.step_budget.saturating_sub(self.current_step)
    }

    /// Whether the budget allows another step.
    pub fn budget_exhausted(&self) -> bool {
        self.current_step >= self.step_budget
    }

    /// Advance to the next step and return its ordinal (1-based).
    pub fn begin_step(&mut self) -> u32 {
        self.current_step += 1;
        self.current_step
    }

    /// Record that a tool was used, keeping first-use order without
    /// duplicates.
    pub fn note_tool_used(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counter_is_monotonic() {
        let mut ctx = RunContext::new("run-1", "query", 3);
        assert_eq!(ctx.begin_step(), 1);
        assert_eq!(ctx.begin_step(), 2);
        assert_eq!(ctx.remaining_steps(), 1);
        assert!(!ctx.budget_exhausted());
        ctx.begin_step();
        assert!(ctx.budget_exhausted());
        assert_eq!(ctx.remaining_steps(), 0);
    }

    #[test]
    fn tools_used_dedupes_preserving_order() {
        let mut ctx = RunContext::new("run-1", "query", 5);
        ctx.note_tool_used("file_read");
        ctx.note_tool_used("list_files");
        ctx.note_tool_used("file_read");
        assert_eq!(ctx.tools_used, vec!["file_read", "list_files"]);
    }
}
