//! Agents: backends that run a conversation turn and stream canonical events
//!
//! Every backend kind implements [`Agent`]. Native protocols are translated
//! into [`CanonicalEvent`]s inside the agent, so the run coordinator never
//! sees backend specific shapes.

mod adapter_agent;
mod crewai;
mod in_process;
mod langgraph;
mod platform;
mod predict_state;
mod protocol;
mod remote;

pub use adapter_agent::{map_adapter_stream, AdapterAgent};
pub use crewai::CrewAiAgent;
pub use in_process::{InProcessAgent, InProcessAgentBuilder, APPROVAL_INTERRUPT};
pub use langgraph::{LangGraphEventMapper, LangGraphHttpAgent};
pub use platform::LangGraphPlatformAgent;
pub use predict_state::{PredictStateConfig, PredictStateTracker};
pub use protocol::{decode_ndjson, ProtocolMapper, RuntimeEvent};
pub use remote::RemoteHttpAgent;

use futures::stream::BoxStream;
use serde_json::Value;

use crate::adapter::{AdapterError, ForwardedParameters};
use crate::events::CanonicalEvent;
use crate::types::{new_id, ActionDefinition, Message};

/// Errors raised by agents
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Connection refused, reset, or dropped mid-stream
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Backend output broke the protocol in a way that cannot be skipped
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The agent cannot continue interrupted runs
    #[error("agent '{0}' does not support resuming runs")]
    ResumeUnsupported(String),

    /// No interrupted run with this id is known to the agent
    #[error("no interrupted run '{0}'")]
    UnknownRun(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

/// Everything an agent needs to start a run
#[derive(Debug, Clone)]
pub struct RunInput {
    pub thread_id: String,
    pub run_id: String,
    /// Id for the assistant reply the client will render
    pub message_id: String,
    pub messages: Vec<Message>,
    /// Actions the agent may call; local ones are executed by the runtime
    pub actions: Vec<ActionDefinition>,
    pub state: Option<Value>,
    pub forwarded_parameters: ForwardedParameters,
    /// Opaque request properties passed through to remote backends
    pub properties: Value,
}

impl RunInput {
    pub fn new(thread_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: new_id(),
            message_id: new_id(),
            messages,
            actions: Vec::new(),
            state: None,
            forwarded_parameters: ForwardedParameters::default(),
            properties: Value::Object(Default::default()),
        }
    }

    pub fn with_actions(mut self, actions: Vec<ActionDefinition>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }
}

/// Input for continuing an interrupted run
///
/// `run` carries the new sub-run's ids; its `thread_id` is the interrupted
/// run's thread.
#[derive(Debug, Clone)]
pub struct ResumeInput {
    pub run: RunInput,
    /// Run that was interrupted
    pub parent_run_id: String,
    /// Externally supplied answer to the interrupt
    pub resolution: Value,
}

pub type AgentEventStream = BoxStream<'static, Result<CanonicalEvent, AgentError>>;

/// A started run: its id and its single-consumer event stream
pub struct RunHandle {
    pub run_id: String,
    pub events: AgentEventStream,
}

impl RunHandle {
    pub fn new(run_id: impl Into<String>, events: AgentEventStream) -> Self {
        Self {
            run_id: run_id.into(),
            events,
        }
    }

    pub fn into_stream(self) -> AgentEventStream {
        self.events
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// A backend capable of streaming a reply to a conversation
///
/// Returning from `start` means the run has begun; events are consumed from
/// the handle. Dropping the handle closes the backend connection.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError>;

    /// Continue an interrupted run with an external resolution
    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        let _ = input;
        Err(AgentError::ResumeUnsupported(self.name().to_string()))
    }
}

#[async_trait::async_trait]
impl Agent for std::sync::Arc<dyn Agent> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> &str {
        (**self).description()
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        (**self).start(input).await
    }

    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        (**self).resume(input).await
    }
}

/// Map a lower-level failure to the error an agent reports
pub(crate) fn transport_error(err: reqwest::Error) -> AgentError {
    if let Some(status) = err.status() {
        AgentError::Http {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else {
        AgentError::Transport(err.to_string())
    }
}
