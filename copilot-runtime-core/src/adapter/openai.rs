//! OpenAI-compatible chat completions adapter

use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{AdapterChunk, AdapterError, AdapterRequest, AdapterStream, ServiceAdapter};
use crate::types::{ActionDefinition, Message};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Streams `POST {base_url}/chat/completions` over server-sent events
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Read the key from `OPENAI_API_KEY`
    pub fn from_env() -> Result<Self, AdapterError> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AdapterError::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Default model when the request does not forward one
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn request_body(&self, request: &AdapterRequest) -> Value {
        let params = &request.forwarded_parameters;
        let mut body = Map::new();
        body.insert(
            "model".into(),
            json!(params.model.as_deref().unwrap_or(&self.model)),
        );
        body.insert("stream".into(), json!(true));
        body.insert(
            "messages".into(),
            Value::Array(request.messages.iter().filter_map(convert_message).collect()),
        );
        if !request.actions.is_empty() {
            body.insert(
                "tools".into(),
                Value::Array(request.actions.iter().map(convert_action).collect()),
            );
            if let Some(choice) = &params.tool_choice {
                let choice = match choice.as_str() {
                    "auto" | "none" | "required" => json!(choice),
                    name => json!({"type": "function", "function": {"name": name}}),
                };
                body.insert("tool_choice".into(), choice);
            }
        }
        if let Some(t) = params.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(max) = params.max_tokens {
            body.insert("max_tokens".into(), json!(max));
        }
        if !params.stop.is_empty() {
            body.insert("stop".into(), json!(params.stop));
        }
        for (key, value) in &params.extra {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(body)
    }
}

fn convert_message(message: &Message) -> Option<Value> {
    let value = match message {
        Message::System { content, .. } => json!({"role": "system", "content": content}),
        Message::Developer { content, .. } => json!({"role": "developer", "content": content}),
        Message::User { content, .. } => json!({"role": "user", "content": content}),
        Message::Assistant {
            content,
            tool_calls,
            ..
        } => {
            let mut msg = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments}
                        })
                    })
                    .collect();
            }
            msg
        }
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}),
        Message::Activity { .. } => return None,
    };
    Some(value)
}

fn convert_action(action: &ActionDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": action.name,
            "description": action.description,
            "parameters": action.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Turns completion chunks into adapter chunks
///
/// Calls are keyed by the provider's `index`, so parallel calls may interleave
/// their argument fragments. A call stays open until another call reuses its
/// index, text resumes, or the response finishes. Fragments without an
/// index go to the most recently opened call.
#[derive(Debug, Default)]
struct StreamState {
    open: Vec<(Option<u32>, String)>,
    finished: bool,
}

impl StreamState {
    fn close_tools(&mut self, out: &mut Vec<AdapterChunk>) {
        for (_, id) in self.open.drain(..) {
            out.push(AdapterChunk::ToolCallEnd { id });
        }
    }

    fn close_index(&mut self, index: Option<u32>, out: &mut Vec<AdapterChunk>) {
        let Some(index) = index else {
            self.close_tools(out);
            return;
        };
        if let Some(pos) = self.open.iter().position(|(i, _)| *i == Some(index)) {
            let (_, id) = self.open.remove(pos);
            out.push(AdapterChunk::ToolCallEnd { id });
        }
    }

    fn target(&self, index: Option<u32>) -> Option<&str> {
        index
            .and_then(|index| self.open.iter().find(|(i, _)| *i == Some(index)))
            .or_else(|| self.open.last())
            .map(|(_, id)| id.as_str())
    }

    fn open_ids(&self) -> Vec<&str> {
        self.open.iter().map(|(_, id)| id.as_str()).collect()
    }

    fn apply(&mut self, chunk: CompletionChunk) -> Vec<AdapterChunk> {
        let mut out = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            self.close_tools(&mut out);
            out.push(AdapterChunk::TextDelta(text));
        }

        for call in choice.delta.tool_calls {
            let function = call.function.unwrap_or(FunctionDelta {
                name: None,
                arguments: None,
            });
            if let Some(id) = call.id {
                self.close_index(call.index, &mut out);
                out.push(AdapterChunk::ToolCallStart {
                    id: id.clone(),
                    name: function.name.clone().unwrap_or_default(),
                });
                self.open.push((call.index, id));
            }
            if let (Some(id), Some(args)) = (self.target(call.index), function.arguments) {
                if !args.is_empty() {
                    out.push(AdapterChunk::ToolCallArgs {
                        id: id.to_string(),
                        delta: args,
                    });
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            out.extend(self.finish(Some(reason)));
        }
        out
    }

    fn finish(&mut self, reason: Option<String>) -> Vec<AdapterChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.close_tools(&mut out);
        self.finished = true;
        out.push(AdapterChunk::Finish { reason });
        out
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        let body = self.request_body(&request);
        log::debug!(
            "openai request: model={} messages={} tools={}",
            body["model"],
            request.messages.len(),
            request.actions.len()
        );

        let mut source = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .eventsource()
            .map_err(|e| AdapterError::Other(format!("failed to create event source: {e}")))?;

        let stream = async_stream::stream! {
            let mut state = StreamState::default();
            let mut done = false;
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        let data = message.data.trim();
                        if data == "[DONE]" {
                            done = true;
                            break;
                        }
                        match serde_json::from_str::<CompletionChunk>(data) {
                            Ok(chunk) => {
                                for out in state.apply(chunk) {
                                    yield Ok(out);
                                }
                            }
                            Err(e) => log::warn!("skipping malformed completion chunk: {e}"),
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let message = response.text().await.unwrap_or_default();
                        source.close();
                        yield Err(AdapterError::Http { status: status.as_u16(), message });
                        return;
                    }
                    Err(e) => {
                        source.close();
                        yield Err(AdapterError::Network(e.to_string()));
                        return;
                    }
                }
            }
            source.close();
            // A connection that drops before [DONE] or a finish_reason leaves
            // open calls with cut-off arguments.
            if !done && !state.finished && !state.open.is_empty() {
                let ids = state.open_ids().join(", ");
                yield Err(AdapterError::Network(format!("stream ended mid tool call: {ids}")));
                return;
            }
            for out in state.finish(None) {
                yield Ok(out);
            }
        };

        Ok(Box::pin(stream))
    }
}
