//! LangGraph agents served from a remote endpoint
//!
//! LangGraph streams `astream_events` dictionaries. [`LangGraphEventMapper`]
//! turns them into runtime protocol events, which then pass through the
//! shared [`ProtocolMapper`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::protocol::{
    decode_ndjson, ProtocolMapper, RuntimeEvent, META_COPILOTKIT_INTERRUPT, META_INTERRUPT,
    META_PREDICT_STATE,
};
use super::remote::execute_body;
use super::{Agent, AgentError, AgentEventStream, ResumeInput, RunHandle, RunInput};
use crate::endpoint::RemoteEndpoint;
use crate::types::new_id;

const EMIT_TOOL_CALLS: &str = "copilotkit:emit-tool-calls";
const EMIT_MESSAGES: &str = "copilotkit:emit-messages";
const EMIT_INTERMEDIATE_STATE: &str = "copilotkit:emit-intermediate-state";
const DEFAULT_MAX_THREADS: usize = 1000;

/// Which tool calls a node wants streamed to the client
fn tool_calls_enabled(metadata: &Value, tool: &str) -> bool {
    match metadata.get(EMIT_TOOL_CALLS) {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(name)) => name == tool,
        Some(Value::Array(names)) => names.iter().any(|n| n.as_str() == Some(tool)),
        Some(_) => true,
    }
}

fn messages_enabled(metadata: &Value) -> bool {
    metadata
        .get(EMIT_MESSAGES)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

fn as_json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The interesting parts of an `on_chat_model_stream` chunk
struct ModelChunk {
    message_id: Option<String>,
    content: String,
    tool_call_chunks: Vec<Value>,
    finish_reason: Option<String>,
}

impl ModelChunk {
    fn parse(data: &Value) -> Self {
        let chunk = &data["chunk"];
        let kwargs = chunk.get("kwargs").unwrap_or(chunk);

        let content = match &kwargs["content"] {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .first()
                .and_then(|p| p.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        let tool_call_chunks = kwargs["tool_call_chunks"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let finish_reason = kwargs["response_metadata"]["finish_reason"]
            .as_str()
            .map(str::to_string);

        Self {
            message_id: kwargs["id"].as_str().map(str::to_string),
            content,
            tool_call_chunks,
            finish_reason,
        }
    }
}

/// Stateful translation of LangGraph stream events into runtime events
///
/// Text and tool calls are kept well nested: a new tool call or message
/// closes whatever is still open. At end of stream [`finish`](Self::finish)
/// closes an open message but rejects an open tool call, whose arguments
/// never saw a terminator.
#[derive(Debug, Default)]
pub struct LangGraphEventMapper {
    thread_id: String,
    agent_name: String,
    open_message: Option<String>,
    /// Open tool call and whether it is streamed to the client
    open_tool: Option<(String, bool)>,
    had_tool_chunks: bool,
    ended_tools: HashSet<String>,
}

impl LangGraphEventMapper {
    pub fn new(thread_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }

    fn end_message(&mut self, out: &mut Vec<RuntimeEvent>) {
        if let Some(message_id) = self.open_message.take() {
            out.push(RuntimeEvent::TextMessageEnd { message_id });
        }
    }

    fn end_tool(&mut self, out: &mut Vec<RuntimeEvent>) {
        if let Some((id, visible)) = self.open_tool.take() {
            if self.ended_tools.insert(id.clone()) && visible {
                out.push(RuntimeEvent::ActionExecutionEnd {
                    action_execution_id: id,
                });
            }
        }
    }

    fn start_message(&mut self, message_id: String, out: &mut Vec<RuntimeEvent>) {
        self.end_tool(out);
        self.end_message(out);
        out.push(RuntimeEvent::TextMessageStart {
            message_id: message_id.clone(),
            parent_message_id: None,
        });
        self.open_message = Some(message_id);
    }

    fn model_stream(&mut self, data: &Value, metadata: &Value, out: &mut Vec<RuntimeEvent>) {
        let chunk = ModelChunk::parse(data);
        let has_tool_chunks = !chunk.tool_call_chunks.is_empty();

        for tool in &chunk.tool_call_chunks {
            let id = tool["id"].as_str();
            let name = tool["name"].as_str();
            if let (Some(id), Some(name)) = (id, name) {
                self.end_tool(out);
                self.end_message(out);
                let visible = tool_calls_enabled(metadata, name);
                if visible {
                    out.push(RuntimeEvent::ActionExecutionStart {
                        action_execution_id: id.to_string(),
                        action_name: name.to_string(),
                        parent_message_id: chunk.message_id.clone(),
                    });
                }
                self.open_tool = Some((id.to_string(), visible));
            }
            let args = as_json_text(&tool["args"]);
            match &self.open_tool {
                Some((id, true)) if !args.is_empty() => out.push(RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: id.clone(),
                    args,
                }),
                _ => {}
            }
        }

        let tool_calls_done = chunk.finish_reason.as_deref() == Some("tool_calls")
            || (self.had_tool_chunks && !has_tool_chunks);
        if tool_calls_done {
            self.end_tool(out);
        }
        self.had_tool_chunks = has_tool_chunks;

        if !has_tool_chunks && !chunk.content.is_empty() && messages_enabled(metadata) {
            let message_id = chunk.message_id.unwrap_or_else(new_id);
            if self.open_message.as_deref() != Some(message_id.as_str()) {
                self.start_message(message_id.clone(), out);
            }
            out.push(RuntimeEvent::TextMessageContent {
                message_id,
                content: chunk.content,
            });
        }

        if chunk.finish_reason.as_deref() == Some("stop") {
            self.end_message(out);
        }
    }

    fn custom_event(&mut self, name: &str, data: &Value, out: &mut Vec<RuntimeEvent>) {
        match name {
            "copilotkit_manually_emit_message" => {
                let message_id = data["message_id"].as_str().map(str::to_string).unwrap_or_else(new_id);
                self.start_message(message_id.clone(), out);
                out.push(RuntimeEvent::TextMessageContent {
                    message_id: message_id.clone(),
                    content: as_json_text(&data["message"]),
                });
                self.end_message(out);
            }
            "copilotkit_manually_emit_tool_call" => {
                self.end_tool(out);
                self.end_message(out);
                let id = data["id"].as_str().map(str::to_string).unwrap_or_else(new_id);
                out.push(RuntimeEvent::ActionExecutionStart {
                    action_execution_id: id.clone(),
                    action_name: as_json_text(&data["name"]),
                    parent_message_id: None,
                });
                out.push(RuntimeEvent::ActionExecutionArgs {
                    action_execution_id: id.clone(),
                    args: as_json_text(&data["args"]),
                });
                out.push(RuntimeEvent::ActionExecutionEnd {
                    action_execution_id: id,
                });
            }
            "copilotkit_manually_emit_intermediate_state" => {
                if data.is_object() {
                    out.push(self.state_message("", data.clone()));
                }
            }
            "copilotkit_exit" => out.push(RuntimeEvent::MetaEvent {
                name: super::protocol::META_EXIT.to_string(),
                value: Value::Bool(true),
                data: None,
            }),
            other => log::debug!("ignoring custom event '{other}'"),
        }
    }

    fn state_message(&self, node_name: &str, state: Value) -> RuntimeEvent {
        RuntimeEvent::AgentStateMessage {
            thread_id: self.thread_id.clone(),
            agent_name: self.agent_name.clone(),
            node_name: node_name.to_string(),
            run_id: String::new(),
            active: true,
            role: "assistant".to_string(),
            state: state.to_string(),
            running: true,
        }
    }

    /// A `values` chunk from the platform API: a full state snapshot
    fn values(&mut self, data: &Value, out: &mut Vec<RuntimeEvent>) {
        if let Some(interrupts) = data.get("__interrupt__").and_then(Value::as_array) {
            if let Some(first) = interrupts.first() {
                out.push(RuntimeEvent::MetaEvent {
                    name: META_INTERRUPT.to_string(),
                    value: first.get("value").cloned().unwrap_or_else(|| first.clone()),
                    data: None,
                });
                return;
            }
        }
        if let Value::Object(map) = data {
            let state: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "messages" && k.as_str() != "__interrupt__")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.push(self.state_message("", Value::Object(state)));
        }
    }

    pub fn map(&mut self, event: &Value) -> Vec<RuntimeEvent> {
        let mut out = Vec::new();
        let kind = event["event"].as_str().unwrap_or_default();
        let data = &event["data"];
        let metadata = &event["metadata"];

        if let Some(config) = metadata.get(EMIT_INTERMEDIATE_STATE) {
            if kind == "on_chat_model_start" {
                out.push(RuntimeEvent::MetaEvent {
                    name: META_PREDICT_STATE.to_string(),
                    value: config.clone(),
                    data: None,
                });
            }
        }

        match kind {
            "on_chat_model_stream" => self.model_stream(data, metadata, &mut out),
            "on_chat_model_end" => {
                self.end_tool(&mut out);
                self.end_message(&mut out);
                self.had_tool_chunks = false;
            }
            "on_copilotkit_state_sync" => {
                let state = match &event["state"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push(RuntimeEvent::AgentStateMessage {
                    thread_id: event["thread_id"].as_str().unwrap_or(&self.thread_id).to_string(),
                    agent_name: event["agent_name"].as_str().unwrap_or(&self.agent_name).to_string(),
                    node_name: event["node_name"].as_str().unwrap_or_default().to_string(),
                    run_id: event["run_id"].as_str().unwrap_or_default().to_string(),
                    active: event["active"].as_bool().unwrap_or(true),
                    role: event["role"].as_str().unwrap_or("assistant").to_string(),
                    state,
                    running: event["running"].as_bool().unwrap_or(true),
                });
            }
            "on_custom_event" => {
                let name = event["name"].as_str().unwrap_or_default();
                self.custom_event(name, data, &mut out);
            }
            "on_copilotkit_emit_message" => {
                self.custom_event("copilotkit_manually_emit_message", data, &mut out)
            }
            "on_copilotkit_emit_tool_call" => {
                self.custom_event("copilotkit_manually_emit_tool_call", data, &mut out)
            }
            "on_interrupt" => out.push(RuntimeEvent::MetaEvent {
                name: META_INTERRUPT.to_string(),
                value: event["value"].clone(),
                data: None,
            }),
            "on_copilotkit_interrupt" => out.push(RuntimeEvent::MetaEvent {
                name: META_COPILOTKIT_INTERRUPT.to_string(),
                value: data["value"].clone(),
                data: Some(data.clone()),
            }),
            "on_copilotkit_error" => out.push(RuntimeEvent::RunError {
                error: data["error"].clone(),
            }),
            "error" => out.push(RuntimeEvent::RunError {
                error: data.get("message").cloned().unwrap_or_else(|| data.clone()),
            }),
            "values" => self.values(data, &mut out),
            "on_chain_end" => {
                let node = metadata["langgraph_node"].as_str();
                if node.is_some() && node == event["name"].as_str() {
                    out.push(RuntimeEvent::NodeFinished {
                        node_name: node.unwrap_or_default().to_string(),
                        state: Value::Null,
                    });
                }
            }
            _ => {}
        }
        out
    }

    /// Close what is left open at end of stream
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] when a tool call is still open.
    pub fn finish(&mut self) -> Result<Vec<RuntimeEvent>, AgentError> {
        if let Some((id, _)) = self.open_tool.take() {
            if !self.ended_tools.contains(&id) {
                return Err(AgentError::Transport(format!("stream ended mid tool call: {id}")));
            }
        }
        let mut out = Vec::new();
        self.end_message(&mut out);
        Ok(out)
    }
}

/// Drive raw LangGraph events through both mappers
pub(crate) fn map_langgraph_events(
    events: BoxStream<'static, Result<Value, AgentError>>,
    mut graph: LangGraphEventMapper,
    mut protocol: ProtocolMapper,
    on_node: impl Fn(&str) + Send + 'static,
) -> AgentEventStream {
    async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for runtime_event in graph.map(&event) {
                if let RuntimeEvent::AgentStateMessage { node_name, .. } = &runtime_event {
                    if !node_name.is_empty() {
                        on_node(node_name);
                    }
                }
                for out in protocol.map(runtime_event) {
                    yield Ok(out);
                }
            }
        }
        match graph.finish() {
            Ok(events) => {
                for runtime_event in events {
                    for out in protocol.map(runtime_event) {
                        yield Ok(out);
                    }
                }
            }
            Err(e) => yield Err(e),
        }
    }
    .boxed()
}

/// Last graph node seen per thread; the first thread seen is evicted first
#[derive(Debug)]
struct ThreadNodes {
    nodes: HashMap<String, String>,
    order: VecDeque<String>,
    max: usize,
}

impl ThreadNodes {
    fn new(max: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            order: VecDeque::new(),
            max: max.max(1),
        }
    }

    fn get(&self, thread_id: &str) -> Option<String> {
        self.nodes.get(thread_id).cloned()
    }

    fn record(&mut self, thread_id: &str, node: &str) {
        if self.nodes.insert(thread_id.to_string(), node.to_string()).is_some() {
            return;
        }
        self.order.push_back(thread_id.to_string());
        while self.order.len() > self.max {
            if let Some(oldest) = self.order.pop_front() {
                self.nodes.remove(&oldest);
            }
        }
    }

    fn forget(&mut self, thread_id: &str) -> bool {
        self.order.retain(|id| id != thread_id);
        self.nodes.remove(thread_id).is_some()
    }
}

/// A LangGraph agent behind a CopilotKit remote endpoint
#[derive(Debug, Clone)]
pub struct LangGraphHttpAgent {
    name: String,
    description: String,
    endpoint: Arc<RemoteEndpoint>,
    /// Sent back so the graph can continue where the thread left off
    nodes: Arc<Mutex<ThreadNodes>>,
}

impl LangGraphHttpAgent {
    pub fn new(name: impl Into<String>, endpoint: Arc<RemoteEndpoint>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            endpoint,
            nodes: Arc::new(Mutex::new(ThreadNodes::new(DEFAULT_MAX_THREADS))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Threads whose last node is remembered; the oldest is forgotten past this
    pub fn with_max_threads(self, max: usize) -> Self {
        *self.nodes.lock() = ThreadNodes::new(max);
        self
    }

    /// Last node recorded for `thread_id`
    pub fn last_node(&self, thread_id: &str) -> Option<String> {
        self.nodes.lock().get(thread_id)
    }

    /// Stop tracking a thread that will not continue
    pub fn forget_thread(&self, thread_id: &str) -> bool {
        self.nodes.lock().forget(thread_id)
    }

    async fn run(&self, input: RunInput, meta_events: Vec<Value>) -> Result<RunHandle, AgentError> {
        let node_name = self.nodes.lock().get(&input.thread_id);
        let mut body = execute_body(&self.name, &input, meta_events);
        body["nodeName"] = json!(node_name);

        log::debug!("starting langgraph agent '{}' on {}", self.name, self.endpoint.url());
        let bytes = self.endpoint.execute_agent(&body).await?;
        let events = decode_ndjson::<Value, _>(bytes);

        let nodes = self.nodes.clone();
        let thread_id = input.thread_id.clone();
        let protocol = ProtocolMapper::new(&input.run_id, &self.name)
            .with_state(input.state.clone().unwrap_or(Value::Null));
        let stream = map_langgraph_events(
            events,
            LangGraphEventMapper::new(&input.thread_id, &self.name),
            protocol,
            move |node| {
                nodes.lock().record(&thread_id, node);
            },
        );
        Ok(RunHandle::new(input.run_id, stream))
    }
}

#[async_trait::async_trait]
impl Agent for LangGraphHttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        self.run(input, Vec::new()).await
    }

    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        let meta = json!({"name": META_INTERRUPT, "response": input.resolution});
        self.run(input.run, vec![meta]).await
    }
}
