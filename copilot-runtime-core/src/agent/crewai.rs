//! CrewAI crews and flows served from a remote endpoint
//!
//! Crews speak the runtime event protocol like any remote agent. The request
//! additionally carries the crew's kickoff `inputs`, taken from
//! `state.inputs` when present and otherwise from the whole state object.

use std::sync::Arc;

use serde_json::{json, Value};

use super::protocol::{decode_ndjson, map_runtime_events, ProtocolMapper, RuntimeEvent, META_INTERRUPT};
use super::remote::execute_body;
use super::{Agent, AgentError, ResumeInput, RunHandle, RunInput};
use crate::endpoint::RemoteEndpoint;

fn crew_inputs(state: Option<&Value>) -> Value {
    match state {
        Some(state) => match state.get("inputs") {
            Some(inputs) if inputs.is_object() => inputs.clone(),
            _ if state.is_object() => state.clone(),
            _ => json!({}),
        },
        None => json!({}),
    }
}

#[derive(Debug, Clone)]
pub struct CrewAiAgent {
    name: String,
    description: String,
    endpoint: Arc<RemoteEndpoint>,
}

impl CrewAiAgent {
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
        let mut body = execute_body(&self.name, &input, meta_events);
        body["inputs"] = crew_inputs(input.state.as_ref());

        log::debug!("kicking off crew '{}' on {}", self.name, self.endpoint.url());
        let bytes = self.endpoint.execute_agent(&body).await?;
        let mapper = ProtocolMapper::new(&input.run_id, &self.name)
            .with_state(input.state.clone().unwrap_or(Value::Null));
        let events = map_runtime_events(decode_ndjson::<RuntimeEvent, _>(bytes), mapper);
        Ok(RunHandle::new(input.run_id, events))
    }
}

#[async_trait::async_trait]
impl Agent for CrewAiAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        self.run(input, Vec::new()).await
    }

    /// Crews ask for human input through an interrupt; the answer goes back as a meta event
    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        let meta = json!({"name": META_INTERRUPT, "response": input.resolution});
        self.run(input.run, vec![meta]).await
    }
}
