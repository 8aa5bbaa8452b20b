//! The runtime: agent resolution, run coordination and hooks
//!
//! A [`CopilotRuntime`] is built once with [`RuntimeBuilder`] and shared by
//! every request. [`CopilotRuntime::process`] validates a request, resolves
//! the agent that serves it, and spawns the run; events arrive on the
//! returned [`RuntimeRun`] in the order the agent produced them.

mod builder;
mod coordinator;
mod discovery;
mod request;
mod tracker;

pub use builder::RuntimeBuilder;
pub use request::{ResumeRequest, RuntimeRequest};
pub use tracker::{RunRecord, RunTracker};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionRegistry, ScopedActions};
use crate::adapter::ServiceAdapter;
use crate::agent::{AdapterAgent, Agent};
use crate::config::{ConfigError, RuntimeConfig};
use crate::endpoint::AgentInfo;
use crate::events::{CanonicalEvent, HookId, RuntimeHook};
use crate::types::{new_id, ActionDefinition, Thread, ThreadError};
use coordinator::{Coordinator, RunPlan};
use discovery::{Discovered, Discovery};

/// Name of the agent serving requests through the service adapter
pub const DEFAULT_AGENT_NAME: &str = "default";

/// Errors raised before a run starts
///
/// Once a run has started, failures are reported in-band as `Error` events.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("no agent or service adapter available to serve the request")]
    NoAgentAvailable,

    /// The request declares a local action the runtime has no handler for
    #[error("action '{0}' is declared local but no handler is registered")]
    MissingLocalHandler(String),

    /// Resume of a run that is not interrupted
    #[error("run '{0}' is not awaiting resumption")]
    UnknownRun(String),

    #[error("run '{0}' already exists")]
    RunExists(String),

    #[error("invalid message history: {0}")]
    InvalidThread(#[from] ThreadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Agents and actions the runtime can serve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub agents: Vec<AgentInfo>,
    pub actions: Vec<ActionDefinition>,
}

/// A started run
pub struct RuntimeRun {
    pub thread_id: String,
    pub run_id: String,
    events: ReceiverStream<CanonicalEvent>,
}

impl RuntimeRun {
    /// The run's events, ending after `RunFinished`
    pub fn into_stream(self) -> ReceiverStream<CanonicalEvent> {
        self.events
    }
}

impl std::fmt::Debug for RuntimeRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRun")
            .field("thread_id", &self.thread_id)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

pub(crate) struct RuntimeInner {
    pub adapter: Option<Arc<dyn ServiceAdapter>>,
    pub agents: HashMap<String, Arc<dyn Agent>>,
    pub agent_order: Vec<String>,
    pub actions: Arc<ActionRegistry>,
    pub discovery: Discovery,
    pub tracker: RunTracker,
    pub hooks: parking_lot::RwLock<HashMap<HookId, Arc<dyn RuntimeHook>>>,
    pub next_hook_id: AtomicU64,
    pub config: RuntimeConfig,
}

impl RuntimeInner {
    pub fn notify(&self, event: &CanonicalEvent) {
        let hooks = self.hooks.read();
        for hook in hooks.values() {
            hook.on_event(event);
        }
    }
}

/// The Copilot Runtime
///
/// Cheap to clone; clones share agents, actions, hooks and run tracking.
///
/// ```ignore
/// let runtime = CopilotRuntime::builder()
///     .service_adapter(OpenAiAdapter::from_env()?)
///     .action(lookup_weather)
///     .build()?;
///
/// let run = runtime.process(request, CancellationToken::new()).await?;
/// let mut events = run.into_stream();
/// while let Some(event) = events.next().await {
///     println!("{}", codec::encode(&event)?);
/// }
/// ```
#[derive(Clone)]
pub struct CopilotRuntime {
    inner: Arc<RuntimeInner>,
}

impl CopilotRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn from_inner(inner: RuntimeInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Observe every event the runtime emits
    pub fn add_hook(&self, hook: impl RuntimeHook + 'static) -> HookId {
        let id = HookId(self.inner.next_hook_id.fetch_add(1, Ordering::SeqCst));
        self.inner.hooks.write().insert(id, Arc::new(hook));
        id
    }

    /// Returns true if the hook was registered
    pub fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.write().remove(&id).is_some()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Runs currently streaming or waiting for resumption
    pub fn tracker(&self) -> &RunTracker {
        &self.inner.tracker
    }

    /// Local and discovered agents, plus the runtime's own actions
    pub async fn info(&self, properties: &Value) -> RuntimeInfo {
        let discovered = self.inner.discovery.discover(properties).await;
        let mut agents: Vec<AgentInfo> = self
            .inner
            .agent_order
            .iter()
            .filter_map(|name| self.inner.agents.get(name))
            .map(|agent| AgentInfo {
                name: agent.name().to_string(),
                description: agent.description().to_string(),
                kind: None,
            })
            .collect();
        agents.extend(discovered.agents.into_iter().map(|d| d.info));

        let mut actions = self.inner.actions.definitions();
        actions.extend(discovered.actions.iter().map(|a| a.definition()));
        RuntimeInfo { agents, actions }
    }

    /// Start a run for `request`
    ///
    /// Setup problems are returned as errors before anything streams. The
    /// run stops without further events once `cancel` fires or the returned
    /// stream is dropped.
    pub async fn process(
        &self,
        request: RuntimeRequest,
        cancel: CancellationToken,
    ) -> Result<RuntimeRun, RuntimeError> {
        let properties = request.properties();
        let discovered = if self.inner.discovery.is_empty() {
            Discovered::default()
        } else {
            self.inner.discovery.discover(&properties).await
        };

        let resumed = match &request.resume {
            Some(resume) => {
                let parent = self
                    .inner
                    .tracker
                    .interrupted(&resume.run_id)
                    .ok_or_else(|| RuntimeError::UnknownRun(resume.run_id.clone()))?;
                Some((resume.run_id.clone(), resume.resolution.clone(), parent))
            }
            None => None,
        };

        let thread_id = match (&resumed, &request.thread_id) {
            (Some((_, _, parent)), requested) => {
                if requested.as_ref().is_some_and(|t| *t != parent.thread_id) {
                    log::debug!("resume keeps thread {} of the interrupted run", parent.thread_id);
                }
                parent.thread_id.clone()
            }
            (None, Some(thread_id)) => thread_id.clone(),
            (None, None) => new_id(),
        };
        let thread = Thread::from_messages(thread_id.clone(), request.messages)?;

        let mut actions = ScopedActions::new(self.inner.actions.clone());
        for action in discovered.actions.iter().cloned() {
            actions.add(action);
        }
        for action in request.ephemeral_actions {
            actions.add(action);
        }
        if let Some(missing) = request
            .actions
            .iter()
            .find(|def| def.is_local() && !actions.contains(&def.name))
        {
            return Err(RuntimeError::MissingLocalHandler(missing.name.clone()));
        }
        let mut definitions = actions.definitions();
        definitions.extend(
            request
                .actions
                .into_iter()
                .filter(|def| !actions.contains(&def.name)),
        );

        let requested_agent = match &resumed {
            Some((_, _, parent)) => Some(parent.agent_name.as_str()),
            None => request.agent_name.as_deref(),
        };
        let agent = self.resolve_agent(requested_agent, &discovered)?;

        let run_id = request.run_id.unwrap_or_else(new_id);
        let (record, resume, parent) = match resumed {
            Some((parent_run_id, resolution, _)) => {
                let parent = self.inner.tracker.take_interrupted(&parent_run_id)?;
                (
                    RunRecord::resumed_from(&parent_run_id, &parent),
                    Some((parent_run_id.clone(), resolution)),
                    Some((parent_run_id, parent)),
                )
            }
            None => (RunRecord::new(&thread_id, agent.name()), None, None),
        };
        if let Err(e) = self.inner.tracker.begin(&run_id, record) {
            if let Some((parent_run_id, parent)) = parent {
                self.inner.tracker.restore_interrupted(&parent_run_id, parent);
            }
            return Err(e);
        }

        log::info!(
            "starting run {run_id} on thread {thread_id} with agent '{}'",
            agent.name()
        );
        let plan = RunPlan {
            agent,
            thread_id: thread_id.clone(),
            run_id: run_id.clone(),
            message_id: request.message_id.unwrap_or_else(new_id),
            messages: thread.into_messages(),
            definitions,
            actions,
            state: request.state,
            forwarded_parameters: request.forwarded_parameters,
            properties,
            resume,
            parent,
        };

        let (tx, rx) = mpsc::channel(self.inner.config.event_buffer_size);
        let coordinator = Coordinator::new(plan, self.inner.clone(), tx, cancel);
        tokio::spawn(coordinator.run());

        Ok(RuntimeRun {
            thread_id,
            run_id,
            events: ReceiverStream::new(rx),
        })
    }

    fn resolve_agent(
        &self,
        name: Option<&str>,
        discovered: &Discovered,
    ) -> Result<Arc<dyn Agent>, RuntimeError> {
        if let Some(name) = name {
            if let Some(agent) = self.inner.agents.get(name) {
                return Ok(agent.clone());
            }
            if let Some(found) = discovered.agents.iter().find(|d| d.info.name == name) {
                return Ok(found.agent.clone());
            }
            return match &self.inner.adapter {
                Some(adapter) => {
                    log::debug!("serving agent '{name}' with the service adapter");
                    Ok(Arc::new(AdapterAgent::new(name, adapter.clone())))
                }
                None => Err(RuntimeError::AgentNotFound(name.to_string())),
            };
        }

        if let Some(adapter) = &self.inner.adapter {
            return Ok(Arc::new(AdapterAgent::new(DEFAULT_AGENT_NAME, adapter.clone())));
        }

        let mut candidates = self
            .inner
            .agents
            .values()
            .cloned()
            .chain(discovered.agents.iter().map(|d| d.agent.clone()));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Ok(only),
            _ => Err(RuntimeError::NoAgentAvailable),
        }
    }
}

impl std::fmt::Debug for CopilotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotRuntime")
            .field("adapter", &self.inner.adapter.as_ref().map(|a| a.name().to_string()))
            .field("agents", &self.inner.agent_order)
            .field("actions", &self.inner.actions)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
