//! Test doubles for exercising the agent loop without a live provider.
//!
//! Used by this crate's unit tests and by downstream integration tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use taskforge_core::cancel::StopToken;
use taskforge_core::error::{ProviderError, ToolError};
use taskforge_core::message::{Message, MessageToolCall};
use taskforge_core::provider::{
    Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
};
use taskforge_core::tool::{Tool, ToolResult};

/// One scripted model reply.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    pub content: String,
    pub tool_calls: Vec<MessageToolCall>,
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![MessageToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }

    pub fn with_call(mut self, id: &str, name: &str, arguments: &str) -> Self {
        self.tool_calls.push(MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        });
        self
    }
}

/// A provider that plays back scripted replies in order.
///
/// Streaming goes through the trait's default `stream()`, so every scripted
/// reply arrives as one whole-call chunk. Once the script is exhausted (or
/// when built with `failing()`), every call errors.
pub struct SequentialMockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicU32,
    streams_tool_calls: bool,
}

impl SequentialMockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
            streams_tool_calls: true,
        }
    }

    pub fn with_texts(texts: Vec<String>) -> Self {
        Self::new(texts.into_iter().map(MockReply::text).collect())
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn blocking_only(mut self) -> Self {
        self.streams_tool_calls = false;
        self
    }

    /// How many completion calls this provider has served.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_streaming_with_tools(&self) -> bool {
        self.streams_tool_calls
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = match self.replies.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            replies.pop_front()
        };
        let Some(reply) = reply else {
            return Err(ProviderError::Network("mock script exhausted".into()));
        };

        let mut message = Message::assistant(reply.content);
        message.tool_calls = reply.tool_calls;
        Ok(ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

/// A provider that requests one tool call per turn, forever, with a fresh
/// call id each time. Useful for budget and cancellation tests.
pub struct EndlessToolCallProvider {
    tool_name: String,
    calls: AtomicU32,
}

impl EndlessToolCallProvider {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for EndlessToolCallProvider {
    fn name(&self) -> &str {
        "endless-mock"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut message = Message::assistant(format!("Working on part {n}"));
        message.tool_calls = vec![MessageToolCall {
            id: format!("call_{n}"),
            name: self.tool_name.clone(),
            arguments: "{}".into(),
        }];
        Ok(ProviderResponse {
            message,
            usage: None,
            model: "mock-model".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

/// A tool that succeeds with a fixed output.
pub struct StaticTool {
    name: String,
    output: String,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Returns a fixed output"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(self.output.clone()))
    }
}

/// A tool that counts its executions and always succeeds.
pub struct CountingTool {
    name: String,
    counter: Arc<AtomicU32>,
}

impl CountingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counter: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.counter)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Counts executions"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolResult::ok(format!("execution {n}")))
    }
}

/// A tool that always errors.
pub struct AlwaysFailsTool {
    name: String,
}

impl AlwaysFailsTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for AlwaysFailsTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: "simulated failure".into(),
        })
    }
}

/// A tool that fails its first `failures` executions, then succeeds.
pub struct FlakyTool {
    name: String,
    failures: u32,
    counter: AtomicU32,
}

impl FlakyTool {
    pub fn new(name: impl Into<String>, failures: u32) -> Self {
        Self {
            name: name.into(),
            failures,
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Fails a few times, then succeeds"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: format!("transient failure {n}"),
            })
        } else {
            Ok(ToolResult::ok("recovered"))
        }
    }
}

/// A tool that trips the run's stop token when executed.
pub struct StopTool {
    token: StopToken,
}

impl StopTool {
    pub fn new(token: StopToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Tool for StopTool {
    fn name(&self) -> &str {
        "stopper"
    }
    fn description(&self) -> &str {
        "Requests cancellation"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.token.stop();
        Ok(ToolResult::ok("stop requested"))
    }
}

/// Minimal tool definitions for planner tests.
pub fn catalog_of(names: &[&str]) -> Vec<ToolDefinition> {
    names
        .iter()
        .map(|name| ToolDefinition {
            name: name.to_string(),
            description: format!("The {name} tool"),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        })
        .collect()
}
