//! Run progress events — the observational side channel of a run.
//!
//! Events are published as the agent loop progresses so UIs can show status.
//! They are purely informational: no subscriber is required for a run to
//! complete correctly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A new agent-loop step began.
    StepStarted { run_id: String, step: u32 },

    /// Partial text token from the LLM.
    Chunk { run_id: String, content: String },

    /// The agent is dispatching a tool call.
    ToolCallIssued {
        run_id: String,
        call_id: String,
        name: String,
    },

    /// Tool execution completed (after retries, if any).
    ToolCompleted {
        run_id: String,
        call_id: String,
        name: String,
        success: bool,
        attempts: u32,
        duration_ms: u64,
    },

    /// A verification pass began.
    VerificationStarted { run_id: String, pass: u32 },

    /// A verification verdict was produced.
    VerdictReached {
        run_id: String,
        pass: u32,
        status: String,
        confidence: u8,
    },

    /// The run produced its final answer.
    Finished {
        run_id: String,
        outcome: String,
        steps_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred.
    ErrorOccurred {
        run_id: String,
        context: String,
        error_message: String,
    },
}

/// A broadcast-based event bus for run events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Safe to share
/// across concurrent runs; events carry the run id so subscribers can filter.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RunEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RunEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RunEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(RunEvent::ToolCompleted {
            run_id: "run-1".into(),
            call_id: "call_1".into(),
            name: "list_files".into(),
            success: true,
            attempts: 1,
            duration_ms: 42,
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            RunEvent::ToolCompleted { name, success, .. } => {
                assert_eq!(name, "list_files");
                assert!(success);
            }
            _ => panic!("Expected ToolCompleted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(RunEvent::ErrorOccurred {
            run_id: "run-1".into(),
            context: "test".into(),
            error_message: "no subscribers".into(),
        });
    }

    #[test]
    fn event_serialization_tags_type() {
        let event = RunEvent::StepStarted {
            run_id: "run-1".into(),
            step: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"step_started""#));
        assert!(json.contains(r#""step":3"#));
    }
}
