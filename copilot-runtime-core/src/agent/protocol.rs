//! The CopilotKit runtime event protocol spoken by remote agents
//!
//! Remote endpoints stream one JSON [`RuntimeEvent`] per line. The
//! [`ProtocolMapper`] turns them into canonical events, diffing full state
//! snapshots into patches and applying predicted state.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::predict_state::{PredictStateConfig, PredictStateTracker};
use super::AgentError;
use crate::codec;
use crate::events::CanonicalEvent;
use crate::types::new_id;

/// Meta event names with runtime meaning
pub const META_INTERRUPT: &str = "LangGraphInterruptEvent";
pub const META_COPILOTKIT_INTERRUPT: &str = "CopilotKitLangGraphInterruptEvent";
pub const META_PREDICT_STATE: &str = "PredictState";
pub const META_EXIT: &str = "Exit";

/// One event of the runtime protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    #[serde(rename_all = "camelCase")]
    TextMessageStart {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TextMessageContent { message_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    TextMessageEnd { message_id: String },
    #[serde(rename_all = "camelCase")]
    ActionExecutionStart {
        action_execution_id: String,
        action_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ActionExecutionArgs {
        action_execution_id: String,
        args: String,
    },
    #[serde(rename_all = "camelCase")]
    ActionExecutionEnd { action_execution_id: String },
    #[serde(rename_all = "camelCase")]
    ActionExecutionResult {
        #[serde(default)]
        action_name: String,
        action_execution_id: String,
        result: Value,
    },
    /// Full agent state; `state` is a JSON document encoded as a string
    #[serde(rename_all = "camelCase")]
    AgentStateMessage {
        #[serde(default)]
        thread_id: String,
        agent_name: String,
        #[serde(default)]
        node_name: String,
        #[serde(default)]
        run_id: String,
        #[serde(default)]
        active: bool,
        #[serde(default)]
        role: String,
        state: String,
        #[serde(default)]
        running: bool,
    },
    MetaEvent {
        name: String,
        #[serde(default)]
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    RunStarted {
        #[serde(default)]
        state: Value,
    },
    RunFinished {
        #[serde(default)]
        state: Value,
    },
    RunError {
        #[serde(default)]
        error: Value,
    },
    NodeStarted {
        #[serde(default, alias = "name")]
        node_name: String,
        #[serde(default)]
        state: Value,
    },
    NodeFinished {
        #[serde(default, alias = "name")]
        node_name: String,
        #[serde(default)]
        state: Value,
    },
}

/// Decode newline-delimited JSON, skipping lines that fail to parse
pub fn decode_ndjson<T, S>(body: S) -> BoxStream<'static, Result<T, AgentError>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<Bytes, AgentError>> + Send + 'static,
{
    codec::lines(body)
        .filter_map(|line| async move {
            match line {
                Ok(line) => match serde_json::from_str::<T>(line.trim()) {
                    Ok(item) => Some(Ok(item)),
                    Err(e) => {
                        log::warn!("skipping malformed event line: {e}: {line}");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}

/// Interrupt payloads arrive as JSON encoded strings; decode them when possible
pub(crate) fn interrupt_payload(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::Null => "agent reported an error".to_string(),
        other => other.to_string(),
    }
}

/// Stateful translation of runtime events into canonical events
#[derive(Debug)]
pub struct ProtocolMapper {
    run_id: String,
    agent_name: String,
    state: Value,
    predict: PredictStateTracker,
}

impl ProtocolMapper {
    pub fn new(run_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_name: agent_name.into(),
            state: Value::Object(Default::default()),
            predict: PredictStateTracker::default(),
        }
    }

    /// Seed the state baseline that snapshots are diffed against
    pub fn with_state(mut self, state: Value) -> Self {
        if state.is_object() {
            self.state = state;
        }
        self
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    fn state_snapshot(&mut self, snapshot: Value, out: &mut Vec<CanonicalEvent>) {
        if !snapshot.is_object() {
            return;
        }
        let patch = json_patch::diff(&self.state, &snapshot);
        self.state = snapshot;
        if !patch.0.is_empty() {
            out.push(CanonicalEvent::StateDelta {
                run_id: self.run_id.clone(),
                agent_name: self.agent_name.clone(),
                patch,
            });
        }
    }

    fn predicted(&mut self, patch: json_patch::Patch, out: &mut Vec<CanonicalEvent>) {
        if let Err(e) = json_patch::patch(&mut self.state, &patch) {
            log::debug!("predicted state does not apply to current state: {e}");
        }
        out.push(CanonicalEvent::StateDelta {
            run_id: self.run_id.clone(),
            agent_name: self.agent_name.clone(),
            patch,
        });
    }

    pub fn map(&mut self, event: RuntimeEvent) -> Vec<CanonicalEvent> {
        let mut out = Vec::new();
        let run_id = self.run_id.clone();
        match event {
            RuntimeEvent::TextMessageStart { .. } | RuntimeEvent::TextMessageEnd { .. } => {}
            RuntimeEvent::TextMessageContent {
                message_id,
                content,
            } => {
                if !content.is_empty() {
                    out.push(CanonicalEvent::TextDelta {
                        run_id,
                        message_id,
                        delta: content,
                    });
                }
            }
            RuntimeEvent::ActionExecutionStart {
                action_execution_id,
                action_name,
                parent_message_id,
            } => {
                self.predict.on_start(&action_execution_id, &action_name);
                out.push(CanonicalEvent::ToolCallStart {
                    run_id,
                    tool_call_id: action_execution_id,
                    name: action_name,
                    parent_message_id,
                });
            }
            RuntimeEvent::ActionExecutionArgs {
                action_execution_id,
                args,
            } => {
                let patch = self.predict.on_args(&action_execution_id, &args);
                out.push(CanonicalEvent::ToolCallArgsDelta {
                    run_id,
                    tool_call_id: action_execution_id,
                    delta: args,
                });
                if let Some(patch) = patch {
                    self.predicted(patch, &mut out);
                }
            }
            RuntimeEvent::ActionExecutionEnd {
                action_execution_id,
            } => {
                let patch = self.predict.on_end(&action_execution_id);
                out.push(CanonicalEvent::ToolCallEnd {
                    run_id,
                    tool_call_id: action_execution_id,
                });
                if let Some(patch) = patch {
                    self.predicted(patch, &mut out);
                }
            }
            RuntimeEvent::ActionExecutionResult {
                action_execution_id,
                result,
                ..
            } => {
                let content = match result {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.push(CanonicalEvent::ToolCallResult {
                    run_id,
                    message_id: new_id(),
                    tool_call_id: action_execution_id,
                    content,
                });
            }
            RuntimeEvent::AgentStateMessage {
                agent_name, state, ..
            } => match serde_json::from_str::<Value>(&state) {
                Ok(snapshot) => {
                    if !agent_name.is_empty() {
                        self.agent_name = agent_name;
                    }
                    self.state_snapshot(snapshot, &mut out);
                }
                Err(e) => log::warn!("skipping agent state message with invalid state: {e}"),
            },
            RuntimeEvent::MetaEvent { name, value, data } => match name.as_str() {
                META_INTERRUPT => out.push(CanonicalEvent::Interrupt {
                    run_id,
                    payload: interrupt_payload(value),
                }),
                META_COPILOTKIT_INTERRUPT => {
                    let payload = data
                        .and_then(|mut d| d.get_mut("value").map(Value::take))
                        .unwrap_or(value);
                    out.push(CanonicalEvent::Interrupt {
                        run_id,
                        payload: interrupt_payload(payload),
                    });
                }
                META_PREDICT_STATE => {
                    self.predict.configure(PredictStateConfig::parse_all(&value));
                }
                META_EXIT => log::debug!("agent requested exit for run {run_id}"),
                other => log::debug!("ignoring meta event '{other}'"),
            },
            RuntimeEvent::RunStarted { state } | RuntimeEvent::NodeStarted { state, .. } => {
                self.state_snapshot(state, &mut out);
            }
            RuntimeEvent::RunFinished { state } => {
                self.state_snapshot(state, &mut out);
            }
            RuntimeEvent::NodeFinished { state, .. } => {
                self.predict.reset();
                self.state_snapshot(state, &mut out);
            }
            RuntimeEvent::RunError { error } => out.push(CanonicalEvent::Error {
                run_id,
                message: error_message(&error),
            }),
        }
        out
    }
}

/// Map a stream of runtime events through a [`ProtocolMapper`]
pub(crate) fn map_runtime_events(
    events: BoxStream<'static, Result<RuntimeEvent, AgentError>>,
    mut mapper: ProtocolMapper,
) -> BoxStream<'static, Result<CanonicalEvent, AgentError>> {
    async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    for out in mapper.map(event) {
                        yield Ok(out);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> RuntimeEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_and_tool_events() {
        let mut mapper = ProtocolMapper::new("r1", "agent");
        let mut out = mapper.map(event(json!({"type": "TextMessageStart", "messageId": "m1"})));
        out.extend(mapper.map(event(json!({"type": "TextMessageContent", "messageId": "m1", "content": "hi"}))));
        out.extend(mapper.map(event(json!({"type": "ActionExecutionStart", "actionExecutionId": "c1", "actionName": "search", "parentMessageId": "m1"}))));
        out.extend(mapper.map(event(json!({"type": "ActionExecutionArgs", "actionExecutionId": "c1", "args": "{}"}))));
        out.extend(mapper.map(event(json!({"type": "ActionExecutionEnd", "actionExecutionId": "c1"}))));

        assert_eq!(out.len(), 4);
        assert!(matches!(&out[0], CanonicalEvent::TextDelta { message_id, delta, .. } if message_id == "m1" && delta == "hi"));
        assert!(matches!(&out[1], CanonicalEvent::ToolCallStart { parent_message_id: Some(p), .. } if p == "m1"));
        assert!(matches!(&out[3], CanonicalEvent::ToolCallEnd { .. }));
    }

    #[test]
    fn test_state_messages_become_diffs() {
        let mut mapper = ProtocolMapper::new("r1", "agent").with_state(json!({"count": 1}));
        let out = mapper.map(event(json!({
            "type": "AgentStateMessage", "threadId": "t1", "agentName": "counter",
            "nodeName": "inc", "runId": "x", "active": true, "role": "assistant",
            "state": "{\"count\": 2}", "running": true
        })));
        match &out[..] {
            [CanonicalEvent::StateDelta { agent_name, patch, .. }] => {
                assert_eq!(agent_name, "counter");
                assert_eq!(
                    serde_json::to_value(patch).unwrap(),
                    json!([{"op": "replace", "path": "/count", "value": 2}])
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        // identical snapshot, no delta
        let out = mapper.map(event(json!({
            "type": "AgentStateMessage", "agentName": "counter", "state": "{\"count\": 2}"
        })));
        assert!(out.is_empty());

        // corrupt snapshot is skipped
        let out = mapper.map(event(json!({
            "type": "AgentStateMessage", "agentName": "counter", "state": "{\"count\""
        })));
        assert!(out.is_empty());
        assert_eq!(mapper.state(), &json!({"count": 2}));
    }

    #[test]
    fn test_predict_state_waits_for_complete_args() {
        let mut mapper = ProtocolMapper::new("r1", "writer");
        mapper.map(event(json!({"type": "MetaEvent", "name": "PredictState", "value": [
            {"state_key": "draft", "tool": "write", "tool_argument": "text"}
        ]})));
        mapper.map(event(json!({"type": "ActionExecutionStart", "actionExecutionId": "c1", "actionName": "write"})));

        let out = mapper.map(event(json!({"type": "ActionExecutionArgs", "actionExecutionId": "c1", "args": "{\"text\": \"Hel"})));
        assert_eq!(out.len(), 1, "partial args must not produce a state delta");

        let out = mapper.map(event(json!({"type": "ActionExecutionArgs", "actionExecutionId": "c1", "args": "lo\"}"})));
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], CanonicalEvent::ToolCallArgsDelta { .. }));
        assert!(matches!(out[1], CanonicalEvent::StateDelta { .. }));
        assert_eq!(mapper.state()["draft"], "Hello");
    }

    #[test]
    fn test_interrupt_and_error() {
        let mut mapper = ProtocolMapper::new("r1", "agent");
        let out = mapper.map(event(json!({
            "type": "MetaEvent", "name": "LangGraphInterruptEvent", "value": "{\"question\":\"ok?\"}"
        })));
        assert_eq!(
            out,
            vec![CanonicalEvent::Interrupt {
                run_id: "r1".into(),
                payload: json!({"question": "ok?"}),
            }]
        );

        let out = mapper.map(event(json!({"type": "RunError", "error": {"message": "graph failed"}})));
        assert!(matches!(&out[0], CanonicalEvent::Error { message, .. } if message == "graph failed"));
    }

    #[tokio::test]
    async fn test_decode_ndjson_skips_corrupt_lines() {
        let body = concat!(
            "{\"type\":\"TextMessageContent\",\"messageId\":\"m\",\"content\":\"a\"}\n",
            "{corrupt\n",
            "{\"type\":\"TextMessageContent\",\"messageId\":\"m\",\"content\":\"b\"}"
        );
        let chunks = vec![Ok(Bytes::from_static(body.as_bytes()))];
        let events: Vec<_> = decode_ndjson::<RuntimeEvent, _>(futures::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(Result::is_ok));
    }
}
