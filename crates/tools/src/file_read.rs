//! File read tool — read text files with size limits and path validation.

use async_trait::async_trait;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{ContentBlock, Tool, ToolResult};

use crate::policy::ToolPolicy;

/// Maximum file size to read (1 MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

pub struct FileReadTool {
    policy: ToolPolicy,
}

impl FileReadTool {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Supports an optional line range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to include (1-based, optional)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to include (inclusive, optional)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let resolved = self.policy.validate(path).map_err(|e| {
            ToolError::PermissionDenied {
                tool_name: "file_read".into(),
                reason: e.to_string(),
            }
        })?;

        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(e) => return Ok(ToolResult::failed(format!("Failed to read file: {e}"))),
        };
        if metadata.is_dir() {
            return Ok(ToolResult::failed(format!(
                "'{path}' is a directory, not a file"
            )));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Ok(ToolResult::failed(format!(
                "File too large: {} bytes (limit {MAX_FILE_SIZE})",
                metadata.len()
            )));
        }

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::failed(format!("Failed to read file: {e}"))),
        };

        let start = arguments["start_line"].as_u64();
        let end = arguments["end_line"].as_u64();
        let total_lines = content.lines().count();

        let output = if start.is_some() || end.is_some() {
            let start = start.unwrap_or(1).max(1) as usize;
            let end = end.unwrap_or(total_lines as u64) as usize;
            content
                .lines()
                .skip(start.saturating_sub(1))
                .take(end.saturating_sub(start - 1))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            content
        };

        let uri = format!("file://{}", resolved.display());
        Ok(ToolResult::ok(output)
            .with_data(serde_json::json!({
                "path": resolved.display().to_string(),
                "size_bytes": metadata.len(),
                "total_lines": total_lines,
            }))
            .with_block(ContentBlock::Resource {
                uri,
                mime_type: Some("text/plain".into()),
                text: None,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{content}").unwrap();
        path
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.txt", "alpha\nbeta\ngamma\n");

        let tool = FileReadTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({"path": path.to_str().unwrap()}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "alpha\nbeta\ngamma\n");
        assert_eq!(result.data.as_ref().unwrap()["total_lines"], 3);
        assert!(matches!(
            result.blocks.first(),
            Some(ContentBlock::Resource { .. })
        ));
    }

    #[tokio::test]
    async fn reads_line_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.txt", "one\ntwo\nthree\nfour\n");

        let tool = FileReadTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({
                "path": path.to_str().unwrap(),
                "start_line": 2,
                "end_line": 3,
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "two\nthree");
    }

    #[tokio::test]
    async fn missing_file_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");

        let tool = FileReadTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({"path": path.to_str().unwrap()}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Failed to read"));
    }

    #[tokio::test]
    async fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({"path": dir.path().to_str().unwrap()}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("is a directory"));
    }
}
