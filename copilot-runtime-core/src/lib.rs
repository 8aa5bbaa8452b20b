//! # Copilot Runtime
//!
//! The server-side core that sits between a copilot UI and the agents or
//! LLM providers that answer it.
//!
//! A request names an agent (or falls back to a service adapter), the
//! runtime streams the agent's reply as [`CanonicalEvent`]s, executes
//! locally registered actions mid-stream, and hands every event to the
//! [`codec`] for line-framed delivery.
//!
//! ## Quick Start
//!
//! ```ignore
//! use copilot_runtime_core::{
//!     adapter::OpenAiAdapter, codec, CopilotRuntime, Message, RuntimeRequest,
//! };
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> copilot_runtime_core::Result<()> {
//!     let runtime = CopilotRuntime::builder()
//!         .service_adapter(OpenAiAdapter::from_env()?)
//!         .build()?;
//!
//!     let request = RuntimeRequest::new(vec![Message::user("What is 2 + 2?")]);
//!     let run = runtime.process(request, CancellationToken::new()).await?;
//!
//!     let mut events = run.into_stream();
//!     while let Some(event) = events.next().await {
//!         print!("{}", codec::encode(&event)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Agents
//!
//! Every backend implements [`Agent`]:
//!
//! - [`agent::InProcessAgent`] - tool-calling loop over a service adapter
//! - [`agent::RemoteHttpAgent`] - CopilotKit remote endpoint agent
//! - [`agent::LangGraphHttpAgent`] - self-hosted LangGraph behind a remote endpoint
//! - [`agent::LangGraphPlatformAgent`] - LangGraph Platform deployment
//! - [`agent::CrewAiAgent`] - CrewAI crews and flows
//!
//! Remote endpoints listed in [`RuntimeConfig`] are discovered on first use.
//!
//! ## Actions
//!
//! Implement [`Action`] for typed handlers, or wrap a closure:
//!
//! ```ignore
//! use copilot_runtime_core::action::{ActionResult, FnAction};
//! use serde_json::{json, Value};
//!
//! let lookup = FnAction::new("lookupWeather", "Current weather for a city", |args: Value| async move {
//!     Ok(ActionResult::json(json!({ "city": args["city"], "forecast": "sunny" }))?)
//! })
//! .with_parameters(json!({
//!     "type": "object",
//!     "properties": { "city": { "type": "string" } },
//!     "required": ["city"]
//! }))
//! .boxed();
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils` - mock adapters, scripted agents and an event collector

pub mod action;
pub mod adapter;
pub mod agent;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod runtime;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use action::{
    box_action, Action, ActionError, ActionRegistry, ActionResult, DispatchError, DynAction,
    FnAction, ScopedActions,
};
pub use adapter::{AdapterChunk, AdapterError, AdapterRequest, ForwardedParameters, ServiceAdapter};
pub use agent::{Agent, AgentError, ResumeInput, RunHandle, RunInput};
pub use codec::{CodecError, Frame, FrameDecoder, FramePrefix};
pub use config::{load_config_file, ConfigError, RemoteEndpointConfig, RuntimeConfig};
pub use endpoint::{AgentInfo, RemoteEndpoint};
pub use error::{Error, Result};
pub use events::{CanonicalEvent, HookId, RunOutcome, RunStatus, RuntimeHook};
pub use runtime::{
    CopilotRuntime, RunTracker, RuntimeBuilder, RuntimeError, RuntimeInfo, RuntimeRequest,
    RuntimeRun,
};
pub use types::{ActionAvailability, ActionDefinition, Message, Thread, ThreadError, ToolCall};
