//! Built-in tools for taskforge agents.
//!
//! Each tool implements [`taskforge_core::Tool`]. File tools go through the
//! [`policy::ToolPolicy`] path checks before touching the filesystem.

pub mod file_read;
pub mod file_write;
pub mod http_request;
pub mod list_files;
pub mod policy;

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use http_request::HttpRequestTool;
pub use list_files::ListFilesTool;
pub use policy::{PathValidationError, ToolPolicy};

use taskforge_core::error::ToolError;
use taskforge_core::tool::ToolRegistry;

/// Build a registry with all built-in tools registered.
pub fn default_registry(policy: &ToolPolicy) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ListFilesTool::new(policy.clone())));
    registry.register(Box::new(FileReadTool::new(policy.clone())));
    registry.register(Box::new(FileWriteTool::new(policy.clone())));
    registry.register(Box::new(HttpRequestTool::new()?));
    Ok(registry)
}
