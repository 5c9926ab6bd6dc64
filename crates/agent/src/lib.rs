//! The taskforge agent engine.
//!
//! An agent run flows through this crate: the [`planner`] sizes up the task,
//! the [`runner`] drives the step loop (model call, [`aggregator`],
//! [`dispatcher`], tool replies), the [`ledger`] records each step, and the
//! [`verifier`] judges completion, re-entering the loop when the model says
//! the task is not done yet.

pub mod aggregator;
pub mod context;
pub mod dispatcher;
pub mod ledger;
pub mod planner;
pub mod runner;
pub mod test_helpers;
pub mod verifier;

pub use aggregator::{AggregateError, AggregatedResponse, StreamAggregator};
pub use context::{ExecutionAttempt, RunContext};
pub use dispatcher::RetryDispatcher;
pub use ledger::{ExecutionStep, InMemoryLedgerStore, LedgerStore, RunLedger};
pub use planner::{Planner, TaskPlan};
pub use runner::{AgentOptions, AgentRunner, RunOutcome, RunReport};
pub use verifier::{CompletionVerdict, NextAction, VerdictStatus, Verifier};
