//! Remote endpoint discovery
//!
//! Each CopilotKit endpoint is asked for its agents and actions once per
//! runtime. A failed handshake is logged and the endpoint skipped; the next
//! request tries again. LangGraph Platform deployments list their agents in
//! configuration and need no handshake.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::action::{DynAction, RemoteEndpointAction};
use crate::agent::{Agent, CrewAiAgent, LangGraphHttpAgent, LangGraphPlatformAgent, RemoteHttpAgent};
use crate::config::RemoteEndpointConfig;
use crate::endpoint::{AgentInfo, EndpointInfo, RemoteEndpoint};

/// An agent found on a remote endpoint
#[derive(Clone)]
pub(crate) struct DiscoveredAgent {
    pub info: AgentInfo,
    pub agent: Arc<dyn Agent>,
}

#[derive(Default)]
pub(crate) struct Discovered {
    pub agents: Vec<DiscoveredAgent>,
    pub actions: Vec<Arc<dyn DynAction>>,
}

struct CopilotKitEndpoint {
    endpoint: Arc<RemoteEndpoint>,
    info: OnceCell<EndpointInfo>,
}

impl CopilotKitEndpoint {
    async fn info(&self, properties: &Value) -> Option<&EndpointInfo> {
        let result = self
            .info
            .get_or_try_init(|| async {
                let info = self.endpoint.info(properties).await?;
                log::info!(
                    "discovered {} agent(s) and {} action(s) at {}",
                    info.agents.len(),
                    info.actions.len(),
                    self.endpoint.url()
                );
                Ok::<_, crate::agent::AgentError>(info)
            })
            .await;
        match result {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("skipping remote endpoint {}: {e}", self.endpoint.url());
                None
            }
        }
    }
}

fn remote_agent(endpoint: &Arc<RemoteEndpoint>, info: &AgentInfo) -> Arc<dyn Agent> {
    match info.kind.as_deref() {
        Some("langgraph") => Arc::new(
            LangGraphHttpAgent::new(&info.name, endpoint.clone()).with_description(&info.description),
        ),
        Some("crewai") => Arc::new(
            CrewAiAgent::new(&info.name, endpoint.clone()).with_description(&info.description),
        ),
        _ => Arc::new(
            RemoteHttpAgent::new(&info.name, endpoint.clone()).with_description(&info.description),
        ),
    }
}

#[derive(Default)]
pub(crate) struct Discovery {
    endpoints: Vec<CopilotKitEndpoint>,
    platform_agents: Vec<DiscoveredAgent>,
}

impl Discovery {
    pub fn from_config(configs: &[RemoteEndpointConfig]) -> Self {
        let mut discovery = Self::default();
        for config in configs {
            match config {
                RemoteEndpointConfig::CopilotKit { url, headers } => {
                    let endpoint = RemoteEndpoint::new(url).with_headers(headers.clone());
                    discovery.endpoints.push(CopilotKitEndpoint {
                        endpoint: Arc::new(endpoint),
                        info: OnceCell::new(),
                    });
                }
                RemoteEndpointConfig::LangGraphPlatform {
                    deployment_url,
                    api_key,
                    agents,
                } => {
                    for agent_config in agents {
                        let mut agent = LangGraphPlatformAgent::new(&agent_config.name, deployment_url)
                            .with_description(&agent_config.description);
                        if let Some(key) = api_key.as_deref().filter(|k| !k.is_empty()) {
                            agent = agent.with_api_key(key);
                        }
                        if let Some(id) = &agent_config.assistant_id {
                            agent = agent.with_assistant_id(id);
                        }
                        discovery.platform_agents.push(DiscoveredAgent {
                            info: AgentInfo {
                                name: agent_config.name.clone(),
                                description: agent_config.description.clone(),
                                kind: Some("langgraph-platform".into()),
                            },
                            agent: Arc::new(agent),
                        });
                    }
                }
            }
        }
        discovery
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.platform_agents.is_empty()
    }

    /// Agents and actions from every reachable endpoint
    ///
    /// Remote actions are bound to `properties` so they travel with each call.
    pub async fn discover(&self, properties: &Value) -> Discovered {
        let mut discovered = Discovered {
            agents: self.platform_agents.clone(),
            actions: Vec::new(),
        };
        for source in &self.endpoints {
            let Some(info) = source.info(properties).await else {
                continue;
            };
            for agent in &info.agents {
                discovered.agents.push(DiscoveredAgent {
                    info: agent.clone(),
                    agent: remote_agent(&source.endpoint, agent),
                });
            }
            for action in &info.actions {
                let action = RemoteEndpointAction::new(source.endpoint.clone(), action)
                    .with_properties(properties.clone());
                discovered.actions.push(Arc::new(action));
            }
        }
        discovered
    }
}
