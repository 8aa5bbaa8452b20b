use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::DynAction;
use crate::adapter::ForwardedParameters;
use crate::types::{ActionDefinition, Message};

/// Continue an interrupted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub run_id: String,
    #[serde(default)]
    pub resolution: Value,
}

/// An inbound request, as mapped from the transport body
///
/// ```json
/// { "threadId": "t1", "agentName": "calc",
///   "messages": [{ "role": "user", "content": "2+2?" }] }
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Id for the assistant reply; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Actions advertised by the client
    #[serde(default, alias = "tools")]
    pub actions: Vec<ActionDefinition>,
    #[serde(default, alias = "agent", skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub forwarded_parameters: ForwardedParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeRequest>,
    /// Opaque properties forwarded to remote endpoints
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    /// Handlers that live only for this request
    #[serde(skip)]
    pub(crate) ephemeral_actions: Vec<Arc<dyn DynAction>>,
}

impl RuntimeRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_agent(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Advertise client-side actions
    pub fn with_actions(mut self, actions: Vec<ActionDefinition>) -> Self {
        self.actions = actions;
        self
    }

    /// Register a handler for this request only; the shared registry is untouched
    pub fn with_action(mut self, action: Arc<dyn DynAction>) -> Self {
        self.ephemeral_actions.push(action);
        self
    }

    pub fn resuming(mut self, run_id: impl Into<String>, resolution: Value) -> Self {
        self.resume = Some(ResumeRequest {
            run_id: run_id.into(),
            resolution,
        });
        self
    }

    pub(crate) fn properties(&self) -> Value {
        match &self.properties {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        }
    }
}

impl std::fmt::Debug for RuntimeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ephemeral: Vec<&str> = self.ephemeral_actions.iter().map(|a| a.name()).collect();
        f.debug_struct("RuntimeRequest")
            .field("thread_id", &self.thread_id)
            .field("run_id", &self.run_id)
            .field("agent_name", &self.agent_name)
            .field("messages", &self.messages.len())
            .field("actions", &self.actions)
            .field("ephemeral_actions", &ephemeral)
            .field("resume", &self.resume)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_request() {
        let request: RuntimeRequest = serde_json::from_value(json!({
            "threadId": "t1",
            "agentName": "calc",
            "messages": [{"role": "user", "content": "2+2?"}]
        }))
        .unwrap();

        assert_eq!(request.thread_id.as_deref(), Some("t1"));
        assert_eq!(request.agent_name.as_deref(), Some("calc"));
        assert_eq!(request.messages.len(), 1);
        assert!(request.actions.is_empty());
        assert_eq!(request.properties(), json!({}));
    }

    #[test]
    fn test_tools_alias_and_resume() {
        let request: RuntimeRequest = serde_json::from_value(json!({
            "messages": [],
            "tools": [{"name": "lookup", "available": "local"}],
            "agent": "planner",
            "resume": {"runId": "r1", "resolution": {"approved": true}},
            "forwardedParameters": {"model": "gpt-4o", "temperature": 0.2}
        }))
        .unwrap();

        assert!(request.actions[0].is_local());
        assert_eq!(request.agent_name.as_deref(), Some("planner"));
        assert_eq!(request.resume.unwrap().resolution, json!({"approved": true}));
        assert_eq!(request.forwarded_parameters.model.as_deref(), Some("gpt-4o"));
    }
}
