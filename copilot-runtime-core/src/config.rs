//! Runtime configuration
//!
//! Configuration can be built in code through [`crate::RuntimeBuilder`] or
//! loaded from a JSON file with [`load_config_file`]:
//!
//! ```json
//! {
//!   "maxToolRounds": 4,
//!   "remoteEndpoints": [
//!     { "type": "copilotKit", "url": "http://localhost:8000/copilotkit",
//!       "headers": { "authorization": "Bearer ${AGENT_TOKEN}" } },
//!     { "type": "langGraphPlatform", "deploymentUrl": "https://example.langgraph.app",
//!       "apiKey": "${LANGSMITH_API_KEY:-}",
//!       "agents": [{ "name": "planner", "description": "Plans trips" }] }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_MAX_INTERRUPTED_RUNS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A LangGraph Platform assistant exposed as an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformAgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteEndpointConfig {
    /// Endpoint speaking the CopilotKit remote protocol; agents and actions are discovered
    #[serde(rename_all = "camelCase")]
    CopilotKit {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// LangGraph Platform deployment; agents are listed here, not discovered
    #[serde(rename_all = "camelCase")]
    LangGraphPlatform {
        deployment_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(default)]
        agents: Vec<PlatformAgentConfig>,
    },
}

impl RemoteEndpointConfig {
    pub fn copilot_kit(url: impl Into<String>) -> Self {
        Self::CopilotKit {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = match self {
            Self::CopilotKit { url, .. } => url,
            Self::LangGraphPlatform { deployment_url, .. } => deployment_url,
        };
        url::Url::parse(url)
            .map(|_| ())
            .map_err(|e| ConfigError::Invalid(format!("invalid endpoint url '{url}': {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub remote_endpoints: Vec<RemoteEndpointConfig>,
    /// Model calls allowed per run when local actions keep being called
    pub max_tool_rounds: usize,
    /// Capacity of the channel between a run and its consumer
    pub event_buffer_size: usize,
    /// Emit an `AssistantMessage` snapshot once each assistant message completes
    pub emit_message_snapshots: bool,
    /// Interrupted runs kept for resumption; the oldest is evicted past this
    pub max_interrupted_runs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            remote_endpoints: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            emit_message_snapshots: false,
            max_interrupted_runs: DEFAULT_MAX_INTERRUPTED_RUNS,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid("maxToolRounds must be at least 1".into()));
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid("eventBufferSize must be at least 1".into()));
        }
        if self.max_interrupted_runs == 0 {
            return Err(ConfigError::Invalid("maxInterruptedRuns must be at least 1".into()));
        }
        self.remote_endpoints.iter().try_for_each(RemoteEndpointConfig::validate)
    }
}

/// Load a runtime configuration from a JSON file
///
/// `~` in the path is expanded. `${VAR}` and `${VAR:-default}` in the file
/// content are replaced from the environment; unset variables without a
/// default are left as written.
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
    let path_str = path.as_ref().to_string_lossy().to_string();
    let expanded_path = shellexpand::tilde(&path_str);
    let content = tokio::fs::read_to_string(Path::new(expanded_path.as_ref())).await?;

    let content = shellexpand::env_with_context_no_errors(&content, |var| std::env::var(var).ok());
    let config: RuntimeConfig = serde_json::from_str(&content)?;
    config.validate()?;
    log::debug!(
        "loaded runtime config from {} with {} remote endpoint(s)",
        path_str,
        config.remote_endpoints.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.max_tool_rounds, 8);
        assert_eq!(config.event_buffer_size, 100);
        assert!(!config.emit_message_snapshots);
        assert_eq!(config.max_interrupted_runs, 1000);
    }

    #[test]
    fn test_endpoint_variants() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "remoteEndpoints": [
                {"type": "copilotKit", "url": "http://localhost:8000/copilotkit"},
                {"type": "langGraphPlatform", "deploymentUrl": "https://lg.example.com",
                 "agents": [{"name": "planner", "assistantId": "a-1"}]}
            ]
        }))
        .unwrap();

        assert_eq!(
            config.remote_endpoints[0],
            RemoteEndpointConfig::copilot_kit("http://localhost:8000/copilotkit")
        );
        match &config.remote_endpoints[1] {
            RemoteEndpointConfig::LangGraphPlatform { agents, api_key, .. } => {
                assert_eq!(agents[0].assistant_id.as_deref(), Some("a-1"));
                assert!(api_key.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = RuntimeConfig {
            max_tool_rounds: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config: RuntimeConfig = serde_json::from_str(r#"{"maxInterruptedRuns": 0}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("maxInterruptedRuns")));

        let config = RuntimeConfig {
            remote_endpoints: vec![RemoteEndpointConfig::copilot_kit("not a url")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_config_file_expands_env() {
        std::env::set_var("COPILOT_RUNTIME_TEST_URL", "http://agents.internal:9000");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "maxToolRounds": 3,
                "remoteEndpoints": [
                    {{"type": "copilotKit", "url": "${{COPILOT_RUNTIME_TEST_URL}}/copilotkit"}},
                    {{"type": "copilotKit", "url": "${{COPILOT_RUNTIME_UNSET_URL:-http://fallback:1}}"}}
                ]
            }}"#
        )
        .unwrap();

        let config = load_config_file(file.path()).await.unwrap();
        assert_eq!(config.max_tool_rounds, 3);
        assert_eq!(
            config.remote_endpoints,
            vec![
                RemoteEndpointConfig::copilot_kit("http://agents.internal:9000/copilotkit"),
                RemoteEndpointConfig::copilot_kit("http://fallback:1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_config_file("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
