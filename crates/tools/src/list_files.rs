//! List files tool — enumerate directory entries with path validation.

use async_trait::async_trait;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{Tool, ToolResult};

use crate::policy::ToolPolicy;

pub struct ListFilesTool {
    policy: ToolPolicy,
}

impl ListFilesTool {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Returns one name per line; directories have a trailing slash."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to list"
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
                tool_name: "list_files".into(),
                reason: e.to_string(),
            }
        })?;

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolResult::failed(format!("Failed to list directory: {e}"))),
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        let data = serde_json::json!({ "entries": names, "count": names.len() });
        Ok(ToolResult::ok(names.join("\n")).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tool_definition() {
        let tool = ListFilesTool::new(ToolPolicy::default());
        assert_eq!(tool.name(), "list_files");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[tokio::test]
    async fn lists_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt"] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(f, "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = ListFilesTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({"path": dir.path().to_str().unwrap()}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "a.txt\nb.txt\nsub/");
        assert_eq!(result.data.unwrap()["count"], 3);
    }

    #[tokio::test]
    async fn missing_directory_reports_failure() {
        let tool = ListFilesTool::new(ToolPolicy::default());
        let result = tool
            .execute(serde_json::json!({"path": "/tmp/taskforge_test_missing_dir_9871"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Failed to list"));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let tool = ListFilesTool::new(ToolPolicy::default());
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn forbidden_path_blocked() {
        let tool = ListFilesTool::new(ToolPolicy {
            allowed_roots: vec![],
            forbidden_paths: vec!["/etc".into()],
        });
        let result = tool.execute(serde_json::json!({"path": "/etc"})).await;
        assert!(result.is_err());
    }
}
