//! # taskforge Core
//!
//! Domain types, traits, and error definitions for the taskforge agent
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external capability (LLM transport, tool execution) is defined as a
//! trait here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod cancel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::StopToken;
pub use error::{Error, Result};
pub use event::{EventBus, RunEvent};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta, Usage};
pub use tool::{ContentBlock, Tool, ToolCall, ToolRegistry, ToolResult};
