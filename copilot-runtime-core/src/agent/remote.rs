//! Agents speaking the runtime event protocol over a remote endpoint

use std::sync::Arc;

use serde_json::{json, Value};

use super::protocol::{decode_ndjson, map_runtime_events, ProtocolMapper, RuntimeEvent, META_INTERRUPT};
use super::{Agent, AgentError, ResumeInput, RunHandle, RunInput};
use crate::endpoint::RemoteEndpoint;

/// Request body for `POST {url}/agents/execute`
pub(crate) fn execute_body(name: &str, input: &RunInput, meta_events: Vec<Value>) -> Value {
    let actions: Vec<Value> = input
        .actions
        .iter()
        .map(|a| json!({"name": a.name, "description": a.description, "parameters": a.parameters}))
        .collect();
    json!({
        "name": name,
        "threadId": input.thread_id,
        "runId": input.run_id,
        "nodeName": Value::Null,
        "state": input.state.clone().unwrap_or_else(|| json!({})),
        "messages": input.messages,
        "actions": actions,
        "properties": input.properties,
        "metaEvents": meta_events,
    })
}

/// A remote agent whose endpoint streams [`RuntimeEvent`]s as ndjson
#[derive(Debug, Clone)]
pub struct RemoteHttpAgent {
    name: String,
    description: String,
    endpoint: Arc<RemoteEndpoint>,
}

impl RemoteHttpAgent {
    pub fn new(name: impl Into<String>, endpoint: Arc<RemoteEndpoint>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            endpoint,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    async fn run(&self, input: RunInput, meta_events: Vec<Value>) -> Result<RunHandle, AgentError> {
        let body = execute_body(&self.name, &input, meta_events);
        log::debug!("starting remote agent '{}' on {}", self.name, self.endpoint.url());
        let bytes = self.endpoint.execute_agent(&body).await?;
        let mapper = ProtocolMapper::new(&input.run_id, &self.name)
            .with_state(input.state.clone().unwrap_or(Value::Null));
        let events = map_runtime_events(decode_ndjson::<RuntimeEvent, _>(bytes), mapper);
        Ok(RunHandle::new(input.run_id, events))
    }
}

#[async_trait::async_trait]
impl Agent for RemoteHttpAgent {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CanonicalEvent;
    use crate::types::Message;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_streams_runtime_events() {
        let server = MockServer::start().await;
        let body = concat!(
            r#"{"type":"TextMessageStart","messageId":"m1"}"#, "\n",
            r#"{"type":"TextMessageContent","messageId":"m1","content":"Hi"}"#, "\n",
            r#"{"type":"TextMessageEnd","messageId":"m1"}"#, "\n",
        );
        Mock::given(method("POST"))
            .and(path("/copilotkit/agents/execute"))
            .and(body_partial_json(json!({"name": "helper", "threadId": "t1"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let endpoint = Arc::new(RemoteEndpoint::new(format!("{}/copilotkit/", server.uri())));
        let agent = RemoteHttpAgent::new("helper", endpoint);
        let handle = agent
            .start(RunInput::new("t1", vec![Message::user("hello")]))
            .await
            .unwrap();
        let events: Vec<_> = handle.into_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(CanonicalEvent::TextDelta { delta, .. }) if delta == "Hi"));
    }

    #[tokio::test]
    async fn test_http_failure_is_reported_at_start() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let agent = RemoteHttpAgent::new("helper", Arc::new(RemoteEndpoint::new(server.uri())));
        let err = agent.start(RunInput::new("t1", vec![])).await.unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_resume_sends_interrupt_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "metaEvents": [{"name": "LangGraphInterruptEvent", "response": {"approved": true}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let agent = RemoteHttpAgent::new("helper", Arc::new(RemoteEndpoint::new(server.uri())));
        let handle = agent
            .resume(ResumeInput {
                run: RunInput::new("t1", vec![]),
                parent_run_id: "r0".into(),
                resolution: json!({"approved": true}),
            })
            .await
            .unwrap();
        assert_eq!(handle.into_stream().count().await, 0);
    }
}
