//! Agents hosted on a LangGraph Platform deployment
//!
//! Runs stream from `POST {deployment}/threads/{thread_id}/runs/stream` as
//! server-sent events. `events` frames carry LangGraph stream events and
//! `values` frames carry state snapshots, including pending interrupts.

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::{json, Value};

use super::langgraph::{map_langgraph_events, LangGraphEventMapper};
use super::protocol::ProtocolMapper;
use super::{transport_error, Agent, AgentError, ResumeInput, RunHandle, RunInput};

/// Thread ids minted by the client carry this prefix; the platform expects bare UUIDs
const CLIENT_THREAD_PREFIX: &str = "ck-";

fn platform_thread_id(thread_id: &str) -> &str {
    thread_id
        .strip_prefix(CLIENT_THREAD_PREFIX)
        .unwrap_or(thread_id)
}

#[derive(Debug, Clone)]
pub struct LangGraphPlatformAgent {
    name: String,
    description: String,
    deployment_url: String,
    api_key: Option<String>,
    assistant_id: Option<String>,
    client: reqwest::Client,
}

impl LangGraphPlatformAgent {
    pub fn new(name: impl Into<String>, deployment_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            deployment_url: deployment_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            assistant_id: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sent as `x-api-key`
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Assistant to run; defaults to the agent name, which the platform resolves as a graph id
    pub fn with_assistant_id(mut self, id: impl Into<String>) -> Self {
        self.assistant_id = Some(id.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/{path}", self.deployment_url));
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn ensure_thread(&self, thread_id: &str) -> Result<(), AgentError> {
        let response = self
            .post("threads")
            .json(&json!({"thread_id": thread_id, "if_exists": "do_nothing"}))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn run_payload(&self, input: &RunInput, resume: Option<Value>) -> Value {
        let mut payload = json!({
            "assistant_id": self.assistant_id.as_deref().unwrap_or(&self.name),
            "stream_mode": ["events", "values"],
        });
        match resume {
            Some(resolution) => {
                let resolution = match resolution {
                    Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                    other => other,
                };
                payload["command"] = json!({ "resume": resolution });
            }
            None => {
                let mut state = match input.state.clone() {
                    Some(Value::Object(map)) => map,
                    _ => serde_json::Map::new(),
                };
                state.insert("messages".into(), serde_json::to_value(&input.messages).unwrap_or_default());
                payload["input"] = Value::Object(state);
            }
        }
        payload
    }

    /// Connect and wait for the stream to open so HTTP failures surface here
    async fn open(&self, thread_id: &str, payload: &Value) -> Result<EventSource, AgentError> {
        let mut source = self
            .post(&format!("threads/{thread_id}/runs/stream"))
            .json(payload)
            .eventsource()
            .map_err(|e| AgentError::Other(format!("failed to create event source: {e}")))?;

        match source.next().await {
            Some(Ok(Event::Open)) => Ok(source),
            Some(Ok(Event::Message(_))) => Err(AgentError::Protocol(
                "stream produced data before opening".to_string(),
            )),
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
                source.close();
                Err(AgentError::Http {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                })
            }
            Some(Err(e)) => {
                source.close();
                Err(AgentError::Transport(e.to_string()))
            }
            None => Err(AgentError::Transport("stream closed before opening".to_string())),
        }
    }

    async fn run(&self, input: RunInput, resume: Option<Value>) -> Result<RunHandle, AgentError> {
        let thread_id = platform_thread_id(&input.thread_id).to_string();
        self.ensure_thread(&thread_id).await?;

        let payload = self.run_payload(&input, resume);
        log::debug!("starting platform run of '{}' on thread {thread_id}", self.name);
        let mut source = self.open(&thread_id, &payload).await?;

        let frames = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        let data: Value = match serde_json::from_str(&message.data) {
                            Ok(data) => data,
                            Err(e) => {
                                log::warn!("skipping malformed platform frame: {e}");
                                continue;
                            }
                        };
                        match message.event.as_str() {
                            "events" => yield Ok(data),
                            "values" | "error" => yield Ok(json!({"event": message.event, "data": data})),
                            "end" => break,
                            _ => continue,
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        source.close();
                        yield Err(AgentError::Transport(e.to_string()));
                        return;
                    }
                }
            }
            source.close();
        }
        .boxed();

        let protocol = ProtocolMapper::new(&input.run_id, &self.name)
            .with_state(input.state.clone().unwrap_or(Value::Null));
        let events = map_langgraph_events(
            frames,
            LangGraphEventMapper::new(&input.thread_id, &self.name),
            protocol,
            |_| {},
        );
        Ok(RunHandle::new(input.run_id, events))
    }
}

#[async_trait::async_trait]
impl Agent for LangGraphPlatformAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        self.run(input, None).await
    }

    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        self.run(input.run, Some(input.resolution)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CanonicalEvent;
    use crate::types::Message;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_thread(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"thread_id": "abc"})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_client_thread_prefix_is_stripped() {
        assert_eq!(platform_thread_id("ck-1234"), "1234");
        assert_eq!(platform_thread_id("1234"), "1234");
    }

    #[tokio::test]
    async fn test_streams_events_and_interrupts() {
        let server = MockServer::start().await;
        mount_thread(&server).await;

        let chunk = json!({"event": "on_chat_model_stream", "metadata": {}, "data": {"chunk": {"id": "m1", "content": "Hi"}}});
        let sse = format!(
            "event: metadata\ndata: {{\"run_id\":\"x\"}}\n\nevent: events\ndata: {chunk}\n\nevent: values\ndata: {}\n\n",
            json!({"__interrupt__": [{"value": {"question": "continue?"}}]})
        );
        Mock::given(method("POST"))
            .and(path("/threads/abc/runs/stream"))
            .and(header("x-api-key", "secret"))
            .and(body_partial_json(json!({"assistant_id": "planner", "stream_mode": ["events", "values"]})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let agent = LangGraphPlatformAgent::new("planner", server.uri()).with_api_key("secret");
        let events: Vec<_> = agent
            .start(RunInput::new("ck-abc", vec![Message::user("plan")]))
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert!(matches!(&events[0], Ok(CanonicalEvent::TextDelta { delta, .. }) if delta == "Hi"));
        assert!(matches!(&events[1], Ok(CanonicalEvent::Interrupt { payload, .. }) if payload["question"] == "continue?"));
    }

    #[tokio::test]
    async fn test_resume_sends_command() {
        let server = MockServer::start().await;
        mount_thread(&server).await;
        Mock::given(method("POST"))
            .and(path("/threads/abc/runs/stream"))
            .and(body_partial_json(json!({"command": {"resume": {"approved": true}}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw("", "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let agent = LangGraphPlatformAgent::new("planner", server.uri());
        let handle = agent
            .resume(ResumeInput {
                run: RunInput::new("abc", vec![]),
                parent_run_id: "r0".into(),
                resolution: json!("{\"approved\": true}"),
            })
            .await
            .unwrap();
        assert_eq!(handle.into_stream().count().await, 0);
    }

    #[tokio::test]
    async fn test_http_error_surfaces_at_start() {
        let server = MockServer::start().await;
        mount_thread(&server).await;
        Mock::given(method("POST"))
            .and(path("/threads/abc/runs/stream"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no assistant"))
            .mount(&server)
            .await;

        let agent = LangGraphPlatformAgent::new("planner", server.uri());
        let err = agent.start(RunInput::new("abc", vec![])).await.unwrap_err();
        assert!(matches!(err, AgentError::Http { status: 404, .. }));
    }
}
