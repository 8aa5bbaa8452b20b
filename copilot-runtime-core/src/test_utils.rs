//! Test utilities for copilot-runtime-core.
//!
//! Mock adapters and agents for exercising the runtime without real LLM
//! providers or remote agent servers.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! copilot-runtime-core = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust
//! use copilot_runtime_core::{CopilotRuntime, test_utils::MockAdapter};
//!
//! let adapter = MockAdapter::new()
//!     .with_tool_call("call_1", "add", r#"{"a": 2, "b": 3}"#)
//!     .with_text("The answer is 5");
//!
//! let runtime = CopilotRuntime::builder()
//!     .service_adapter(adapter)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::adapter::{AdapterChunk, AdapterError, AdapterRequest, AdapterStream, ServiceAdapter};
use crate::agent::{Agent, AgentError, ResumeInput, RunHandle, RunInput};
use crate::events::{CanonicalEvent, RuntimeHook};

#[derive(Clone)]
enum MockResponse {
    Chunks(Vec<AdapterChunk>),
    /// Chunks followed by a mid-stream failure
    Broken(Vec<AdapterChunk>, String),
    /// Chunks followed by a stream that never ends
    Hanging(Vec<AdapterChunk>),
    Fail(String),
}

/// A mock service adapter for testing.
///
/// Returns pre-programmed responses in order, one per `process` call, and
/// records every request it receives.
///
/// ```rust
/// use copilot_runtime_core::test_utils::MockAdapter;
///
/// let adapter = MockAdapter::new()
///     .with_tool_call("call_1", "lookup", r#"{"city": "Oslo"}"#)
///     .with_text("It is sunny in Oslo");
/// assert_eq!(adapter.call_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockAdapter {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    requests: Arc<Mutex<Vec<AdapterRequest>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, response: MockResponse) -> Self {
        self.responses.lock().push(response);
        self
    }

    /// Queue a text-only response
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.push(MockResponse::Chunks(vec![
            AdapterChunk::TextDelta(text.into()),
            AdapterChunk::Finish {
                reason: Some("stop".to_string()),
            },
        ]))
    }

    /// Queue a response that makes a single tool call
    pub fn with_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        let id = id.into();
        self.push(MockResponse::Chunks(vec![
            AdapterChunk::ToolCallStart {
                id: id.clone(),
                name: name.into(),
            },
            AdapterChunk::ToolCallArgs {
                id: id.clone(),
                delta: arguments.into(),
            },
            AdapterChunk::ToolCallEnd { id },
            AdapterChunk::Finish {
                reason: Some("tool_calls".to_string()),
            },
        ]))
    }

    /// Queue an arbitrary chunk sequence
    pub fn with_chunks(self, chunks: Vec<AdapterChunk>) -> Self {
        self.push(MockResponse::Chunks(chunks))
    }

    /// Queue a response that fails after yielding `chunks`
    pub fn with_stream_error(self, chunks: Vec<AdapterChunk>, message: impl Into<String>) -> Self {
        self.push(MockResponse::Broken(chunks, message.into()))
    }

    /// Queue a response that yields `chunks` and then stalls forever
    pub fn with_hanging_stream(self, chunks: Vec<AdapterChunk>) -> Self {
        self.push(MockResponse::Hanging(chunks))
    }

    /// Queue a failure to start the completion
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(MockResponse::Fail(message.into()))
    }

    /// Number of times `process` was called.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<AdapterRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for MockAdapter {
    fn name(&self) -> &str {
        "MockAdapter"
    }

    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        self.requests.lock().push(request);

        let next = {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        let Some(response) = next else {
            return Err(AdapterError::Other(
                "MockAdapter: no more responses configured".to_string(),
            ));
        };

        Ok(match response {
            MockResponse::Chunks(chunks) => stream::iter(chunks.into_iter().map(Ok)).boxed(),
            MockResponse::Broken(chunks, message) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(AdapterError::Network(message)) }))
                .boxed(),
            MockResponse::Hanging(chunks) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            MockResponse::Fail(message) => return Err(AdapterError::Other(message)),
        })
    }
}

/// One step of a scripted agent run
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(CanonicalEvent),
    /// End the stream with an error
    Fail(String),
    /// Stop producing events without ending the stream
    Hang,
}

impl From<CanonicalEvent> for ScriptStep {
    fn from(event: CanonicalEvent) -> Self {
        Self::Emit(event)
    }
}

/// An agent that plays back scripted event sequences.
///
/// Each `start` or `resume` consumes the next script. Events may carry any
/// run id; the coordinator stamps its own. Inputs are recorded for
/// inspection.
#[derive(Clone)]
pub struct ScriptedAgent {
    name: String,
    resumable: bool,
    scripts: Arc<Mutex<Vec<Vec<ScriptStep>>>>,
    runs: Arc<Mutex<Vec<RunInput>>>,
    resumes: Arc<Mutex<Vec<ResumeInput>>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resumable: true,
            scripts: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(Mutex::new(Vec::new())),
            resumes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject `resume` like agents that cannot continue interrupted runs
    pub fn without_resume(mut self) -> Self {
        self.resumable = false;
        self
    }

    pub fn with_script<I, S>(self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ScriptStep>,
    {
        self.scripts
            .lock()
            .push(steps.into_iter().map(Into::into).collect());
        self
    }

    pub fn runs(&self) -> Vec<RunInput> {
        self.runs.lock().clone()
    }

    pub fn resumes(&self) -> Vec<ResumeInput> {
        self.resumes.lock().clone()
    }

    fn play(&self, run_id: String) -> Result<RunHandle, AgentError> {
        let script = {
            let mut scripts = self.scripts.lock();
            if scripts.is_empty() {
                return Err(AgentError::Other(format!(
                    "ScriptedAgent '{}': no more scripts",
                    self.name
                )));
            }
            scripts.remove(0)
        };
        let events = async_stream::stream! {
            for step in script {
                match step {
                    ScriptStep::Emit(event) => yield Ok(event),
                    ScriptStep::Fail(message) => {
                        yield Err(AgentError::Transport(message));
                        return;
                    }
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(RunHandle::new(run_id, events.boxed()))
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        let run_id = input.run_id.clone();
        self.runs.lock().push(input);
        self.play(run_id)
    }

    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        if !self.resumable {
            return Err(AgentError::ResumeUnsupported(self.name.clone()));
        }
        let run_id = input.run.run_id.clone();
        self.resumes.lock().push(input);
        self.play(run_id)
    }
}

/// Collects runtime events for verification in tests.
///
/// Register with [`crate::CopilotRuntime::add_hook`].
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<CanonicalEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.lock().clone()
    }

    /// Get all collected event type names.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| event_type_name(e).to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn has_event(&self, event_type: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| event_type_name(e) == event_type)
    }

    pub fn count_event(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| event_type_name(e) == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Snake-case name of an event's variant
pub fn event_type_name(event: &CanonicalEvent) -> &'static str {
    match event {
        CanonicalEvent::TextDelta { .. } => "text_delta",
        CanonicalEvent::ToolCallStart { .. } => "tool_call_start",
        CanonicalEvent::ToolCallArgsDelta { .. } => "tool_call_args_delta",
        CanonicalEvent::ToolCallEnd { .. } => "tool_call_end",
        CanonicalEvent::ToolCallResult { .. } => "tool_call_result",
        CanonicalEvent::StateDelta { .. } => "state_delta",
        CanonicalEvent::ControlData { .. } => "control_data",
        CanonicalEvent::Interrupt { .. } => "interrupt",
        CanonicalEvent::AssistantMessage { .. } => "assistant_message",
        CanonicalEvent::Error { .. } => "error",
        CanonicalEvent::RunFinished { .. } => "run_finished",
    }
}

impl RuntimeHook for EventCollector {
    fn on_event(&self, event: &CanonicalEvent) {
        self.events.lock().push(event.clone());
    }
}
