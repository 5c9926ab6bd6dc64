//! Provider trait — the abstraction over LLM chat transports.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of chunks. Streaming
//! chunks carry *raw* tool-call fragments; assembling them into complete
//! calls is the job of the agent crate's aggregator, not the transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ProviderRequest {
    /// A plain blocking request with no tools.
    pub fn text(model: impl Into<String>, messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            max_tokens: None,
            top_p: None,
            tools: Vec::new(),
            stream: false,
            stop: Vec::new(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A partial tool-call fragment inside a stream chunk.
///
/// A fragment either opens a call (carries an `id`), or continues the most
/// recently opened one (no `id`). Names and argument text arrive in pieces
/// across chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Opaque call identity; present on the first fragment of a call.
    #[serde(default)]
    pub id: Option<String>,

    /// Tool name fragment (last non-empty name wins).
    #[serde(default)]
    pub name: Option<String>,

    /// Argument text fragment, concatenated in arrival order.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_deltas: Vec<ToolCallDelta>,

    /// Why the model stopped (only on the final chunks)
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every LLM backend (OpenAI-compatible, Anthropic-proxied, Ollama, custom)
/// implements this trait. The agent loop calls `complete()` or `stream()`
/// without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Whether this transport streams tool-call arguments reliably.
    ///
    /// Supplied by the caller's configuration — the agent loop never infers
    /// this by pattern-matching provider names or URLs. When false, turns
    /// that carry tool definitions are issued as blocking calls.
    fn supports_streaming_with_tools(&self) -> bool {
        true
    }

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single chunk whose tool calls arrive as already-whole fragments.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let deltas = response
            .message
            .tool_calls
            .iter()
            .map(|tc| ToolCallDelta {
                id: Some(tc.id.clone()),
                name: Some(tc.name.clone()),
                arguments: Some(tc.arguments.clone()),
            })
            .collect();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_call_deltas: deltas,
                finish_reason: None,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest::text("gpt-4o", vec![], default_temperature());
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.stream);
        assert!(req.top_p.is_none());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "list_files".into(),
            description: "List directory entries".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list" }
                },
                "required": ["path"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("list_files"));
        assert!(json.contains("path"));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(&Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        });
        assert_eq!(total.total_tokens, 20);
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        use crate::message::{Message, MessageToolCall};

        struct Fixed;

        #[async_trait]
        impl Provider for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn complete(
                &self,
                _request: ProviderRequest,
            ) -> std::result::Result<ProviderResponse, ProviderError> {
                let mut msg = Message::assistant("hello");
                msg.tool_calls = vec![MessageToolCall {
                    id: "call_1".into(),
                    name: "list_files".into(),
                    arguments: "{}".into(),
                }];
                Ok(ProviderResponse {
                    message: msg,
                    usage: None,
                    model: "fixed-model".into(),
                    metadata: serde_json::Map::new(),
                })
            }
        }

        let mut rx = Fixed
            .stream(ProviderRequest::text("fixed-model", vec![], 0.0))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert_eq!(chunk.tool_call_deltas.len(), 1);
        assert_eq!(chunk.tool_call_deltas[0].id.as_deref(), Some("call_1"));
    }
}
