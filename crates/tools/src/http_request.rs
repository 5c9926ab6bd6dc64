//! HTTP request tool — fetch URLs on behalf of the agent.

use async_trait::async_trait;
use std::time::Duration;
use taskforge_core::error::ToolError;
use taskforge_core::tool::{Tool, ToolResult};

/// Response bodies above this size are truncated before being handed back
/// to the model.
const MAX_BODY_BYTES: usize = 256 * 1024;

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("taskforge")
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "http_request".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to a URL. Supports GET, POST, PUT, PATCH and DELETE with an optional JSON body and headers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to request (http or https)"
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "description": "Optional request headers as string key/value pairs"
                },
                "body": {
                    "description": "Optional request body; objects are sent as JSON"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(format!(
                "URL must start with http:// or https://, got '{url}'"
            )));
        }

        let method = arguments["method"].as_str().unwrap_or("GET").to_uppercase();
        let method = match method.as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unsupported HTTP method '{other}'"
                )));
            }
        };

        let mut request = self.client.request(method.clone(), url);

        if let Some(headers) = arguments["headers"].as_object() {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        let body = &arguments["body"];
        if !body.is_null() {
            request = match body {
                serde_json::Value::String(s) => request.body(s.clone()),
                other => request.json(other),
            };
        }

        tracing::debug!(%method, url, "issuing http request");

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(ToolError::Timeout {
                    tool_name: "http_request".into(),
                    timeout_secs: REQUEST_TIMEOUT_SECS,
                });
            }
            Err(e) => return Ok(ToolResult::failed(format!("Request failed: {e}"))),
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::failed(format!("Failed to read body: {e}"))),
        };
        let truncated = body.len() > MAX_BODY_BYTES;
        if truncated {
            body.truncate(MAX_BODY_BYTES);
        }

        let data = serde_json::json!({
            "status": status,
            "content_type": content_type,
            "truncated": truncated,
        });

        let result = ToolResult::ok(format!("HTTP {status}\n{body}")).with_data(data);
        Ok(if (200..400).contains(&status) {
            result
        } else {
            ToolResult {
                success: false,
                ..result
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_url() {
        let tool = HttpRequestTool::new().unwrap();
        let result = tool.execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let tool = HttpRequestTool::new().unwrap();
        let result = tool
            .execute(serde_json::json!({"url": "ftp://example.com/file"}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn rejects_unknown_method() {
        let tool = HttpRequestTool::new().unwrap();
        let result = tool
            .execute(serde_json::json!({"url": "https://example.com", "method": "TRACE"}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn schema_requires_url_only() {
        let tool = HttpRequestTool::new().unwrap();
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["url"]));
    }
}
