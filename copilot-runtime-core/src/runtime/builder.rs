use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use super::discovery::Discovery;
use super::{CopilotRuntime, RunTracker, RuntimeError, RuntimeInner};
use crate::action::{ActionRegistry, DynAction};
use crate::adapter::ServiceAdapter;
use crate::agent::Agent;
use crate::config::{RemoteEndpointConfig, RuntimeConfig};
use crate::events::{HookId, RuntimeHook};

/// Builder for [`CopilotRuntime`]
///
/// ```ignore
/// let runtime = CopilotRuntime::builder()
///     .service_adapter(OpenAiAdapter::from_env()?)
///     .agent(planner)
///     .action(FnAction::new("lookup", "Look up a record", lookup).boxed())
///     .remote_endpoint(RemoteEndpointConfig::copilot_kit("http://localhost:8000/copilotkit"))
///     .build()?;
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    adapter: Option<Arc<dyn ServiceAdapter>>,
    agents: Vec<Arc<dyn Agent>>,
    actions: ActionRegistry,
    config: RuntimeConfig,
    extra_endpoints: Vec<RemoteEndpointConfig>,
    hooks: Vec<Arc<dyn RuntimeHook>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider used when a request names no agent
    pub fn service_adapter(mut self, adapter: impl ServiceAdapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Register an agent under its own name; a later agent with the same name wins
    pub fn agent(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    /// Register a process-wide local action
    pub fn action(mut self, action: Arc<dyn DynAction>) -> Self {
        self.actions.register(action);
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = Arc<dyn DynAction>>) -> Self {
        for action in actions {
            self.actions.register(action);
        }
        self
    }

    /// Add a remote endpoint on top of those in the config
    pub fn remote_endpoint(mut self, endpoint: RemoteEndpointConfig) -> Self {
        self.extra_endpoints.push(endpoint);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hook(mut self, hook: impl RuntimeHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<CopilotRuntime, RuntimeError> {
        let mut config = self.config;
        config.remote_endpoints.extend(self.extra_endpoints);
        config.validate()?;

        let mut agents = HashMap::new();
        let mut agent_order = Vec::new();
        for agent in self.agents {
            let name = agent.name().to_string();
            if agents.insert(name.clone(), agent).is_some() {
                log::warn!("agent '{name}' registered twice; keeping the last one");
            } else {
                agent_order.push(name);
            }
        }

        let hooks: HashMap<HookId, Arc<dyn RuntimeHook>> = self
            .hooks
            .into_iter()
            .enumerate()
            .map(|(i, hook)| (HookId(i as u64), hook))
            .collect();

        log::debug!(
            "built runtime with {} agent(s), {} action(s), {} remote endpoint(s)",
            agent_order.len(),
            self.actions.len(),
            config.remote_endpoints.len()
        );

        Ok(CopilotRuntime::from_inner(RuntimeInner {
            adapter: self.adapter,
            agents,
            agent_order,
            actions: Arc::new(self.actions),
            discovery: Discovery::from_config(&config.remote_endpoints),
            tracker: RunTracker::with_max_interrupted(config.max_interrupted_runs),
            next_hook_id: AtomicU64::new(hooks.len() as u64),
            hooks: parking_lot::RwLock::new(hooks),
            config,
        }))
    }
}
