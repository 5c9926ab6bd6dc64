//! Streaming aggregator — reassembles chunks into one complete response.
//!
//! Providers stream content text and raw tool-call fragments. This module
//! folds one finite chunk sequence into the same shape a blocking call would
//! return: full text plus fully-assembled tool calls. A fragment carrying an
//! id opens (or extends) the call with that id; a fragment without an id
//! extends the most recently opened call. After assembly, calls with an
//! empty name or unparseable argument text are dropped entirely.

use tokio::sync::mpsc;

use taskforge_core::error::ProviderError;
use taskforge_core::message::MessageToolCall;
use taskforge_core::provider::{StreamChunk, Usage};

/// The result of folding one chunk stream.
#[derive(Debug, Clone, Default)]
pub struct AggregatedResponse {
    /// Concatenation of all content fragments, in arrival order.
    pub content: String,

    /// Fully-assembled tool calls that survived validity filtering.
    pub tool_calls: Vec<MessageToolCall>,

    /// Finish reason from the final chunk, if reported.
    pub finish_reason: Option<String>,

    /// Usage totals, typically carried by the final chunk.
    pub usage: Option<Usage>,
}

/// Why aggregation did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// The stream broke while tool calls were in play. The turn should be
    /// reissued as a single blocking call instead of failing the run.
    #[error("stream interrupted mid tool call; retry as a blocking call")]
    RetryBlocking,

    /// The stream failed with no tool calls at stake.
    #[error(transparent)]
    Stream(ProviderError),
}

/// A tool call being assembled from fragments.
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds one chunk stream into an [`AggregatedResponse`].
pub struct StreamAggregator {
    /// Whether the originating request offered tools to the model. Decides
    /// whether a mid-stream failure is recoverable via a blocking retry.
    tools_offered: bool,
}

impl StreamAggregator {
    pub fn new(tools_offered: bool) -> Self {
        Self { tools_offered }
    }

    /// Drain the stream and assemble the response.
    ///
    /// `on_content` is invoked with each content fragment as it arrives, for
    /// progress display. It is observational only.
    pub async fn aggregate<F>(
        &self,
        mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
        mut on_content: F,
    ) -> Result<AggregatedResponse, AggregateError>
    where
        F: FnMut(&str),
    {
        let mut content = String::new();
        let mut calls: Vec<PartialCall> = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(item) = rx.recv().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Providers that mis-stream tool arguments surface here.
                    // With tools at stake the turn is salvageable by a
                    // blocking retry; without them it is a real failure.
                    if self.tools_offered || !calls.is_empty() {
                        tracing::warn!(error = %err, "stream failed mid tool call, requesting blocking retry");
                        return Err(AggregateError::RetryBlocking);
                    }
                    return Err(AggregateError::Stream(err));
                }
            };

            if let Some(text) = &chunk.content
                && !text.is_empty()
            {
                on_content(text);
                content.push_str(text);
            }

            for delta in &chunk.tool_call_deltas {
                match &delta.id {
                    Some(id) => {
                        let idx = match calls.iter().position(|c| c.id == *id) {
                            Some(idx) => idx,
                            None => {
                                calls.push(PartialCall {
                                    id: id.clone(),
                                    ..PartialCall::default()
                                });
                                calls.len() - 1
                            }
                        };
                        merge_fragment(
                            &mut calls[idx],
                            delta.name.as_deref(),
                            delta.arguments.as_deref(),
                        );
                    }
                    None => {
                        // Continuation fragment: belongs to the most recently
                        // opened call. With nothing open it is unattributable
                        // and gets discarded.
                        if delta.name.is_none() && delta.arguments.is_none() {
                            continue;
                        }
                        if let Some(call) = calls.last_mut() {
                            merge_fragment(call, delta.name.as_deref(), delta.arguments.as_deref());
                        } else {
                            tracing::trace!("discarding unattributable tool-call fragment");
                        }
                    }
                }
            }

            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason.clone();
            }
            if chunk.usage.is_some() {
                usage = chunk.usage.clone();
            }
            if chunk.done {
                break;
            }
        }

        let tool_calls = calls
            .into_iter()
            .filter(|call| {
                if call.name.is_empty() {
                    tracing::debug!(id = %call.id, "dropping assembled call with empty name");
                    return false;
                }
                let args = call.arguments.trim();
                if !args.is_empty() && serde_json::from_str::<serde_json::Value>(args).is_err() {
                    tracing::debug!(id = %call.id, name = %call.name, "dropping assembled call with malformed arguments");
                    return false;
                }
                true
            })
            .map(|call| MessageToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        Ok(AggregatedResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn merge_fragment(call: &mut PartialCall, name: Option<&str>, arguments: Option<&str>) {
    // Last non-empty name wins; argument text concatenates in arrival order.
    if let Some(name) = name
        && !name.is_empty()
    {
        call.name = name.to_string();
    }
    if let Some(args) = arguments {
        call.arguments.push_str(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::provider::ToolCallDelta;

    fn delta(id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        }
    }

    fn chunk(deltas: Vec<ToolCallDelta>) -> StreamChunk {
        StreamChunk {
            tool_call_deltas: deltas,
            ..StreamChunk::default()
        }
    }

    async fn aggregate(chunks: Vec<Result<StreamChunk, ProviderError>>) -> AggregatedResponse {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for c in chunks {
            tx.send(c).await.unwrap();
        }
        drop(tx);
        StreamAggregator::new(true)
            .aggregate(rx, |_| {})
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn split_arguments_reassemble() {
        let response = aggregate(vec![
            Ok(chunk(vec![delta(Some("id-1"), Some("list_files"), Some(r#"{"pa"#))])),
            Ok(chunk(vec![delta(Some("id-1"), None, Some(r#"th":"/tmp"}"#))])),
            Ok(StreamChunk {
                done: true,
                ..StreamChunk::default()
            }),
        ])
        .await;

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "id-1");
        assert_eq!(response.tool_calls[0].arguments, r#"{"path":"/tmp"}"#);
    }

    #[tokio::test]
    async fn fragmented_equals_whole() {
        // Aggregating k fragments must equal aggregating one whole fragment.
        let split = aggregate(vec![
            Ok(chunk(vec![delta(Some("id-1"), Some("file_read"), Some(r#"{"pa"#))])),
            Ok(chunk(vec![delta(None, None, Some(r#"th":"/tmp/a"#))])),
            Ok(chunk(vec![delta(None, None, Some(r#".txt"}"#))])),
        ])
        .await;
        let whole = aggregate(vec![Ok(chunk(vec![delta(
            Some("id-1"),
            Some("file_read"),
            Some(r#"{"path":"/tmp/a.txt"}"#),
        )]))])
        .await;

        assert_eq!(split.tool_calls.len(), 1);
        assert_eq!(split.tool_calls[0].arguments, whole.tool_calls[0].arguments);
        assert_eq!(split.tool_calls[0].name, whole.tool_calls[0].name);
    }

    #[tokio::test]
    async fn content_concatenates_in_order() {
        let mut seen = String::new();
        let (tx, rx) = mpsc::channel(4);
        for text in ["Hel", "lo ", "world"] {
            tx.send(Ok(StreamChunk {
                content: Some(text.into()),
                ..StreamChunk::default()
            }))
            .await
            .unwrap();
        }
        drop(tx);

        let response = StreamAggregator::new(false)
            .aggregate(rx, |t| seen.push_str(t))
            .await
            .unwrap();
        assert_eq!(response.content, "Hello world");
        assert_eq!(seen, "Hello world");
    }

    #[tokio::test]
    async fn idless_fragment_merges_into_last_opened_call() {
        let response = aggregate(vec![
            Ok(chunk(vec![delta(Some("a"), Some("file_read"), Some(r#"{"path":"x"}"#))])),
            Ok(chunk(vec![delta(Some("b"), Some("file_write"), Some(r#"{"path""#))])),
            Ok(chunk(vec![delta(None, None, Some(r#":"y","content":"z"}"#))])),
        ])
        .await;

        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(
            response.tool_calls[1].arguments,
            r#"{"path":"y","content":"z"}"#
        );
        assert_eq!(response.tool_calls[0].arguments, r#"{"path":"x"}"#);
    }

    #[tokio::test]
    async fn unattributable_fragment_discarded() {
        let response = aggregate(vec![Ok(chunk(vec![delta(None, None, Some("{}"))]))]).await;
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn invalid_calls_dropped_after_assembly() {
        let response = aggregate(vec![
            // Empty name.
            Ok(chunk(vec![delta(Some("a"), None, Some("{}"))])),
            // Malformed arguments.
            Ok(chunk(vec![delta(Some("b"), Some("file_read"), Some(r#"{"path"#))])),
            // Valid, empty arguments are allowed.
            Ok(chunk(vec![delta(Some("c"), Some("list_files"), None)])),
        ])
        .await;

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "c");
    }

    #[tokio::test]
    async fn stream_error_with_tools_requests_blocking_retry() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        drop(tx);

        let err = StreamAggregator::new(true)
            .aggregate(rx, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AggregateError::RetryBlocking));
    }

    #[tokio::test]
    async fn stream_error_without_tools_surfaces() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Err(ProviderError::Network("down".into())))
            .await
            .unwrap();
        drop(tx);

        let err = StreamAggregator::new(false)
            .aggregate(rx, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AggregateError::Stream(_)));
    }

    #[tokio::test]
    async fn usage_and_finish_reason_from_final_chunk() {
        let response = aggregate(vec![
            Ok(StreamChunk {
                content: Some("done".into()),
                ..StreamChunk::default()
            }),
            Ok(StreamChunk {
                finish_reason: Some("stop".into()),
                done: true,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 4,
                    total_tokens: 14,
                }),
                ..StreamChunk::default()
            }),
        ])
        .await;

        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }
}
