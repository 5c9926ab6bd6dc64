//! Retry dispatcher — executes one turn's tool calls with bounded retries.
//!
//! Calls are dispatched one at a time, in request order. Each call gets up
//! to `max_retries` attempts with a fixed delay between them. The dispatcher
//! always returns exactly one result per input call, in the same order,
//! even when every attempt fails or the call is a duplicate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use taskforge_core::error::ToolError;
use taskforge_core::event::{EventBus, RunEvent};
use taskforge_core::message::MessageToolCall;
use taskforge_core::tool::{ToolCall, ToolRegistry, ToolResult};

use crate::context::{ExecutionAttempt, RunContext};

pub struct RetryDispatcher {
    registry: Arc<ToolRegistry>,
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            registry,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Dispatch one turn's calls. Returns exactly `calls.len()` results,
    /// in request order.
    pub async fn dispatch(
        &self,
        calls: &[MessageToolCall],
        ctx: &mut RunContext,
        events: &EventBus,
    ) -> Vec<ToolResult> {
        // The dedup set and the attempt log grow together. A non-empty set
        // with an empty log means the bookkeeping went out of sync; reset
        // the set and keep going rather than suppress every call forever.
        if !ctx.resolved_call_ids.is_empty() && ctx.attempts.is_empty() {
            tracing::warn!(
                run_id = %ctx.run_id,
                "dedup set out of sync with attempt log; clearing"
            );
            ctx.resolved_call_ids.clear();
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if ctx.resolved_call_ids.contains(&call.id) {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    call_id = %call.id,
                    tool = %call.name,
                    "suppressing duplicate tool call"
                );
                let mut result = ToolResult::failed(format!(
                    "Tool call '{}' was already executed in this run; not repeated.",
                    call.id
                ));
                result.call_id = call.id.clone();
                results.push(result);
                continue;
            }

            let result = self.dispatch_one(call, ctx, events).await;
            ctx.resolved_call_ids.insert(call.id.clone());
            results.push(result);
        }
        results
    }

    async fn dispatch_one(
        &self,
        call: &MessageToolCall,
        ctx: &mut RunContext,
        events: &EventBus,
    ) -> ToolResult {
        events.publish(RunEvent::ToolCallIssued {
            run_id: ctx.run_id.clone(),
            call_id: call.id.clone(),
            name: call.name.clone(),
        });

        let started = Instant::now();

        // Malformed argument text is terminal for this call. No retry: the
        // same text will not parse differently a second time.
        let arguments = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(reason) => {
                let error = format!("Invalid tool arguments: {reason}");
                ctx.attempts.push(ExecutionAttempt {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    attempt: 1,
                    arguments: serde_json::Value::Null,
                    success: false,
                    error: Some(error.clone()),
                    timestamp: chrono::Utc::now(),
                });
                self.publish_completed(events, ctx, call, false, 1, started);
                let mut result = ToolResult::failed(error);
                result.call_id = call.id.clone();
                return result;
            }
        };

        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.clone(),
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.registry.execute(&tool_call).await {
                Ok(result) if result.success => {
                    ctx.attempts.push(ExecutionAttempt {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        attempt,
                        arguments: arguments.clone(),
                        success: true,
                        error: None,
                        timestamp: chrono::Utc::now(),
                    });
                    ctx.note_tool_used(&call.name);
                    self.publish_completed(events, ctx, call, true, attempt, started);
                    return result;
                }
                Ok(result) => {
                    last_error = result.output.clone();
                    self.record_failure(ctx, call, attempt, &arguments, &last_error);
                }
                Err(ToolError::NotFound(name)) => {
                    // Unknown tool: retrying cannot make it appear.
                    last_error = format!("Tool not found: {name}");
                    self.record_failure(ctx, call, attempt, &arguments, &last_error);
                    break;
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.record_failure(ctx, call, attempt, &arguments, &last_error);
                }
            }

            if attempt < self.max_retries {
                tracing::debug!(
                    call_id = %call.id,
                    tool = %call.name,
                    attempt,
                    "tool attempt failed, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let attempts_made = ctx
            .attempts
            .iter()
            .filter(|a| a.call_id == call.id)
            .count() as u32;
        self.publish_completed(events, ctx, call, false, attempts_made, started);

        let mut result = ToolResult::failed(format!(
            "Tool '{}' failed after {attempts_made} attempt(s): {last_error}",
            call.name
        ));
        result.call_id = call.id.clone();
        result
    }

    fn record_failure(
        &self,
        ctx: &mut RunContext,
        call: &MessageToolCall,
        attempt: u32,
        arguments: &serde_json::Value,
        error: &str,
    ) {
        ctx.attempts.push(ExecutionAttempt {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            attempt,
            arguments: arguments.clone(),
            success: false,
            error: Some(error.to_string()),
            timestamp: chrono::Utc::now(),
        });
    }

    fn publish_completed(
        &self,
        events: &EventBus,
        ctx: &RunContext,
        call: &MessageToolCall,
        success: bool,
        attempts: u32,
        started: Instant,
    ) {
        events.publish(RunEvent::ToolCompleted {
            run_id: ctx.run_id.clone(),
            call_id: call.id.clone(),
            name: call.name.clone(),
            success,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Parse tool-call argument text into a JSON value.
///
/// Empty, "null" and "undefined" argument text all mean "no arguments" and
/// become an empty object. Anything else must parse as JSON.
fn parse_arguments(text: &str) -> Result<serde_json::Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        return Ok(serde_json::json!({}));
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Null) => Ok(serde_json::json!({})),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{AlwaysFailsTool, CountingTool, FlakyTool};

    fn call(id: &str, name: &str, args: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    fn dispatcher(registry: ToolRegistry, max_retries: u32) -> RetryDispatcher {
        RetryDispatcher::new(Arc::new(registry), max_retries, Duration::from_millis(1))
    }

    #[test]
    fn empty_and_null_arguments_become_empty_object() {
        assert_eq!(parse_arguments("").unwrap(), serde_json::json!({}));
        assert_eq!(parse_arguments("  ").unwrap(), serde_json::json!({}));
        assert_eq!(parse_arguments("null").unwrap(), serde_json::json!({}));
        assert_eq!(parse_arguments("undefined").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn malformed_arguments_are_an_error() {
        assert!(parse_arguments(r#"{"path"#).is_err());
    }

    #[tokio::test]
    async fn success_stops_retrying() {
        let counting = CountingTool::new("probe");
        let counter = counting.counter();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(counting));

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "probe", "{}")], &mut ctx, &events)
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(ctx.attempts.len(), 1);
        assert_eq!(ctx.tools_used, vec!["probe"]);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_one_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AlwaysFailsTool::new("broken")));

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "broken", "{}")], &mut ctx, &events)
            .await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].output.contains("after 3 attempt"));
        assert_eq!(ctx.attempts.len(), 3);
        assert!(ctx.attempts.iter().all(|a| !a.success));
    }

    #[tokio::test]
    async fn flaky_tool_succeeds_on_retry() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(FlakyTool::new("flaky", 2)));

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "flaky", "{}")], &mut ctx, &events)
            .await;

        assert!(results[0].success);
        assert_eq!(ctx.attempts.len(), 3);
        assert!(ctx.attempts[2].success);
    }

    #[tokio::test]
    async fn malformed_arguments_never_reach_the_tool() {
        let counting = CountingTool::new("probe");
        let counter = counting.counter();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(counting));

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "probe", r#"{"path"#)], &mut ctx, &events)
            .await;

        assert!(!results[0].success);
        assert!(results[0].output.contains("Invalid tool arguments"));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
        // Terminal: exactly one attempt recorded, no retries.
        assert_eq!(ctx.attempts.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_does_not_retry() {
        let registry = ToolRegistry::new();
        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "missing", "{}")], &mut ctx, &events)
            .await;

        assert!(!results[0].success);
        assert_eq!(ctx.attempts.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_identity_is_never_executed_twice() {
        let counting = CountingTool::new("probe");
        let counter = counting.counter();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(counting));
        let dispatcher = dispatcher(registry, 3);

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();

        let first = dispatcher
            .dispatch(&[call("dup-1", "probe", "{}")], &mut ctx, &events)
            .await;
        assert!(first[0].success);

        let second = dispatcher
            .dispatch(&[call("dup-1", "probe", "{}")], &mut ctx, &events)
            .await;
        assert_eq!(second.len(), 1);
        assert!(!second[0].success);
        assert!(second[0].output.contains("already executed"));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_sync_dedup_set_is_cleared() {
        let counting = CountingTool::new("probe");
        let counter = counting.counter();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(counting));

        let mut ctx = RunContext::new("run-1", "q", 10);
        // Set claims c1 resolved, but no attempt was ever logged.
        ctx.resolved_call_ids.insert("c1".into());

        let events = EventBus::default();
        let results = dispatcher(registry, 3)
            .dispatch(&[call("c1", "probe", "{}")], &mut ctx, &events)
            .await;

        assert!(results[0].success);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_result_per_call_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingTool::new("probe")));
        registry.register(Box::new(AlwaysFailsTool::new("broken")));

        let mut ctx = RunContext::new("run-1", "q", 10);
        let events = EventBus::default();
        let results = dispatcher(registry, 2)
            .dispatch(
                &[
                    call("c1", "probe", "{}"),
                    call("c2", "broken", "{}"),
                    call("c3", "missing", "{}"),
                ],
                &mut ctx,
                &events,
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].call_id, "c1");
        assert_eq!(results[1].call_id, "c2");
        assert_eq!(results[2].call_id, "c3");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(!results[2].success);
    }
}
