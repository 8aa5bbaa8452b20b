//! Service adapters over LLM providers
//!
//! A [`ServiceAdapter`] turns a conversation plus tool definitions into a
//! single-pass stream of [`AdapterChunk`]s. Adapters never retry: an LLM
//! call is billed and non-deterministic, so retry policy belongs to the
//! caller.

pub mod custom;
pub mod empty;
pub mod langchain;
pub mod openai;

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ActionDefinition, Message};

pub use custom::CustomAdapter;
pub use empty::EmptyAdapter;
pub use langchain::{LangChainAdapter, LangChainOutput, ToolCallChunk};
pub use openai::OpenAiAdapter;

/// Provider parameters forwarded from the client request
///
/// Common fields are typed. Anything provider specific lands in `extra`
/// and is merged into the provider request body as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// `auto`, `none`, `required`, or a function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Input to a single adapter invocation
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<Message>,
    pub actions: Vec<ActionDefinition>,
    pub forwarded_parameters: ForwardedParameters,
}

impl AdapterRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            thread_id: crate::types::new_id(),
            run_id: crate::types::new_id(),
            messages,
            actions: Vec::new(),
            forwarded_parameters: ForwardedParameters::default(),
        }
    }
}

/// Normalized provider stream item
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterChunk {
    TextDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallArgs { id: String, delta: String },
    ToolCallEnd { id: String },
    /// Provider signalled the end of the response
    Finish { reason: Option<String> },
}

pub type AdapterStream = BoxStream<'static, Result<AdapterChunk, AdapterError>>;

/// Errors from service adapters
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Provider answered with a non-success status
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection refused, reset, or dropped mid-stream
    #[error("network error: {0}")]
    Network(String),

    /// Provider output could not be interpreted
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

/// Interface over concrete LLM providers
#[async_trait::async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start a completion and stream its chunks
    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError>;
}

#[async_trait::async_trait]
impl ServiceAdapter for Arc<dyn ServiceAdapter> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        (**self).process(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forwarded_parameters_keep_unknown_fields() {
        let params: ForwardedParameters = serde_json::from_value(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.2,
            "maxTokens": 512,
            "toolChoice": "auto",
            "seed": 7
        }))
        .unwrap();
        assert_eq!(params.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(params.max_tokens, Some(512));
        assert_eq!(params.extra.get("seed"), Some(&json!(7)));
        assert!(!params.extra.contains_key("model"));
    }
}
