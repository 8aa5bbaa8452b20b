//! Adapter over a user-supplied LangChain-style chain

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AdapterChunk, AdapterError, AdapterRequest, AdapterStream, ServiceAdapter};

/// A fragment of a streamed tool call as LangChain reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
}

/// Items a chain may produce
#[derive(Debug, Clone, PartialEq)]
pub enum LangChainOutput {
    /// Plain string output
    Text(String),
    /// A message chunk with optional tool call fragments
    Chunk {
        content: String,
        tool_call_chunks: Vec<ToolCallChunk>,
    },
    /// Any other value; forwarded as its JSON text
    Json(Value),
}

pub type LangChainStream = BoxStream<'static, Result<LangChainOutput, AdapterError>>;

type ChainFn =
    dyn Fn(AdapterRequest) -> BoxFuture<'static, Result<LangChainStream, AdapterError>> + Send + Sync;

/// Wraps a chain callback and normalizes what it yields
#[derive(Clone)]
pub struct LangChainAdapter {
    chain: Arc<ChainFn>,
}

impl LangChainAdapter {
    pub fn new<F, Fut>(chain: F) -> Self
    where
        F: Fn(AdapterRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<LangChainStream, AdapterError>> + Send + 'static,
    {
        Self {
            chain: Arc::new(move |request| Box::pin(chain(request))),
        }
    }
}

impl std::fmt::Debug for LangChainAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangChainAdapter").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ChunkNormalizer {
    open_tool: Option<String>,
}

impl ChunkNormalizer {
    fn close(&mut self, out: &mut Vec<AdapterChunk>) {
        if let Some(id) = self.open_tool.take() {
            out.push(AdapterChunk::ToolCallEnd { id });
        }
    }

    fn apply(&mut self, item: LangChainOutput) -> Vec<AdapterChunk> {
        let mut out = Vec::new();
        match item {
            LangChainOutput::Text(text) => {
                if !text.is_empty() {
                    self.close(&mut out);
                    out.push(AdapterChunk::TextDelta(text));
                }
            }
            LangChainOutput::Json(value) => {
                self.close(&mut out);
                out.push(AdapterChunk::TextDelta(value.to_string()));
            }
            LangChainOutput::Chunk {
                content,
                tool_call_chunks,
            } => {
                if !content.is_empty() {
                    self.close(&mut out);
                    out.push(AdapterChunk::TextDelta(content));
                }
                for chunk in tool_call_chunks {
                    if let (Some(id), Some(name)) = (&chunk.id, &chunk.name) {
                        self.close(&mut out);
                        out.push(AdapterChunk::ToolCallStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        self.open_tool = Some(id.clone());
                    }
                    match (&self.open_tool, chunk.args) {
                        (Some(id), Some(args)) if !args.is_empty() => {
                            out.push(AdapterChunk::ToolCallArgs {
                                id: id.clone(),
                                delta: args,
                            });
                        }
                        (None, Some(args)) if !args.is_empty() => {
                            log::warn!("dropping tool call arguments with no open tool call");
                        }
                        _ => {}
                    }
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for LangChainAdapter {
    fn name(&self) -> &str {
        "langchain"
    }

    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        let mut items = (self.chain)(request).await?;
        let stream = async_stream::stream! {
            let mut normalizer = ChunkNormalizer::default();
            while let Some(item) = items.next().await {
                match item {
                    Ok(item) => {
                        for chunk in normalizer.apply(item) {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            let mut tail = Vec::new();
            normalizer.close(&mut tail);
            for chunk in tail {
                yield Ok(chunk);
            }
            yield Ok(AdapterChunk::Finish { reason: None });
        };
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use futures::stream;

    #[tokio::test]
    async fn test_normalizes_text_and_tool_chunks() {
        let adapter = LangChainAdapter::new(|request: AdapterRequest| async move {
            assert_eq!(request.messages.len(), 1);
            let items = vec![
                Ok(LangChainOutput::Text("Looking".into())),
                Ok(LangChainOutput::Chunk {
                    content: String::new(),
                    tool_call_chunks: vec![ToolCallChunk {
                        id: Some("t1".into()),
                        name: Some("search".into()),
                        args: Some("{\"q\"".into()),
                    }],
                }),
                Ok(LangChainOutput::Chunk {
                    content: String::new(),
                    tool_call_chunks: vec![ToolCallChunk {
                        args: Some(":\"rust\"}".into()),
                        ..Default::default()
                    }],
                }),
            ];
            Ok(stream::iter(items).boxed())
        });

        let out: Vec<AdapterChunk> = adapter
            .process(AdapterRequest::new(vec![Message::user("find rust")]))
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(
            out,
            vec![
                AdapterChunk::TextDelta("Looking".into()),
                AdapterChunk::ToolCallStart { id: "t1".into(), name: "search".into() },
                AdapterChunk::ToolCallArgs { id: "t1".into(), delta: "{\"q\"".into() },
                AdapterChunk::ToolCallArgs { id: "t1".into(), delta: ":\"rust\"}".into() },
                AdapterChunk::ToolCallEnd { id: "t1".into() },
                AdapterChunk::Finish { reason: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_json_output_becomes_text() {
        let adapter = LangChainAdapter::new(|_| async {
            Ok(stream::iter(vec![Ok(LangChainOutput::Json(serde_json::json!({"ok": true})))]).boxed())
        });
        let out: Vec<_> = adapter
            .process(AdapterRequest::new(vec![]))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(&out[0], Ok(AdapterChunk::TextDelta(t)) if t == r#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_chain_error_ends_stream() {
        let adapter = LangChainAdapter::new(|_| async {
            let items: Vec<Result<LangChainOutput, AdapterError>> = vec![
                Ok(LangChainOutput::Text("partial".into())),
                Err(AdapterError::Network("reset".into())),
            ];
            Ok(stream::iter(items).boxed())
        });
        let out: Vec<_> = adapter
            .process(AdapterRequest::new(vec![]))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(AdapterError::Network(_))));
    }
}
