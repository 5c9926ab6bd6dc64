//! File write tool — create or overwrite text files under the path policy.

use async_trait::async_trait;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{Tool, ToolResult};

use crate::policy::ToolPolicy;

pub struct FileWriteTool {
    policy: ToolPolicy,
}

impl FileWriteTool {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text content to a file, creating it if needed. Set append=true to append instead of overwrite."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The text content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of overwriting (default false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        let append = arguments["append"].as_bool().unwrap_or(false);

        let resolved = self.policy.validate(path).map_err(|e| {
            ToolError::PermissionDenied {
                tool_name: "file_write".into(),
                reason: e.to_string(),
            }
        })?;

        let written = if append {
            use tokio::io::AsyncWriteExt;
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await;
            match file {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&resolved, content).await
        };

        match written {
            Ok(()) => {
                tracing::debug!(path = %resolved.display(), bytes = content.len(), append, "wrote file");
                Ok(ToolResult::ok(format!(
                    "Wrote {} bytes to {}",
                    content.len(),
                    resolved.display()
                ))
                .with_data(serde_json::json!({
                    "path": resolved.display().to_string(),
                    "bytes_written": content.len(),
                    "append": append,
                })))
            }
            Err(e) => Ok(ToolResult::failed(format!("Failed to write file: {e}"))),
        }
    }
}
