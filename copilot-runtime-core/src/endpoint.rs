//! HTTP client for CopilotKit remote endpoints
//!
//! A remote endpoint exposes three routes under its base URL:
//!
//! - `POST {url}/info` lists the agents and actions it serves
//! - `POST {url}/actions/execute` runs one action and returns `{result}`
//! - `POST {url}/agents/execute` runs an agent and streams newline-delimited JSON events

use std::collections::HashMap;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::AgentError;

/// An agent advertised by a remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Event protocol the agent speaks, e.g. `langgraph` or `crewai`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// An action advertised by a remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteActionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Either a JSON schema object or a list of parameter descriptors
    #[serde(default)]
    pub parameters: Value,
}

/// Response of the discovery handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
    #[serde(default)]
    pub actions: Vec<RemoteActionInfo>,
}

/// Convert a list of `{name, type, description, required}` parameter
/// descriptors into a JSON schema object. Schemas pass through unchanged.
pub fn parameters_to_schema(parameters: &Value) -> Value {
    let Value::Array(params) = parameters else {
        return if parameters.is_object() {
            parameters.clone()
        } else {
            json!({"type": "object", "properties": {}})
        };
    };

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in params {
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let mut prop = serde_json::Map::new();
        let kind = param.get("type").and_then(Value::as_str).unwrap_or("string");
        match kind.strip_suffix("[]") {
            Some(item) => {
                prop.insert("type".into(), json!("array"));
                prop.insert("items".into(), json!({ "type": item }));
            }
            None => {
                prop.insert("type".into(), json!(kind));
            }
        }
        if let Some(description) = param.get("description") {
            prop.insert("description".into(), description.clone());
        }
        if param.get("required").and_then(Value::as_bool).unwrap_or(true) {
            required.push(json!(name));
        }
        properties.insert(name.to_string(), Value::Object(prop));
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Client for one remote endpoint URL
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl RemoteEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, route: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(format!("{}/{}", self.url, route)).json(body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        request
    }

    async fn send(&self, route: &str, body: &Value) -> Result<reqwest::Response, AgentError> {
        let response = self
            .post(route, body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("{}/{route}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Discovery handshake
    pub async fn info(&self, properties: &Value) -> Result<EndpointInfo, AgentError> {
        let response = self
            .send("info", &json!({ "properties": properties }))
            .await?;
        response
            .json::<EndpointInfo>()
            .await
            .map_err(|e| AgentError::Protocol(format!("invalid info response: {e}")))
    }

    /// Run a remote action and return its `result` field
    pub async fn execute_action(
        &self,
        name: &str,
        arguments: Value,
        properties: &Value,
    ) -> Result<Value, AgentError> {
        let body = json!({ "name": name, "arguments": arguments, "properties": properties });
        let response = self.send("actions/execute", &body).await?;
        let mut value: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Protocol(format!("invalid action response: {e}")))?;
        Ok(value
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Start an agent run and return the raw response body
    pub async fn execute_agent(
        &self,
        body: &Value,
    ) -> Result<BoxStream<'static, Result<Bytes, AgentError>>, AgentError> {
        let response = self.send("agents/execute", body).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| AgentError::Transport(format!("stream error: {e}"))))
            .boxed())
    }
}
