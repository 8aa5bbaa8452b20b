use std::sync::Arc;

use serde_json::Value;

use super::{ActionError, ActionFuture, ActionResult, DynAction};
use crate::endpoint::{parameters_to_schema, RemoteActionInfo, RemoteEndpoint};

/// An action served by a CopilotKit remote endpoint
///
/// Executed through `POST {url}/actions/execute`. Created during agent
/// discovery and scoped to the request that discovered it.
#[derive(Debug, Clone)]
pub struct RemoteEndpointAction {
    endpoint: Arc<RemoteEndpoint>,
    name: String,
    description: String,
    parameters: Value,
    properties: Value,
}

impl RemoteEndpointAction {
    pub fn new(endpoint: Arc<RemoteEndpoint>, info: &RemoteActionInfo) -> Self {
        Self {
            endpoint,
            name: info.name.clone(),
            description: info.description.clone(),
            parameters: parameters_to_schema(&info.parameters),
            properties: Value::Object(Default::default()),
        }
    }

    /// Request properties forwarded to the endpoint with each call
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

impl DynAction for RemoteEndpointAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn execute_raw(&self, input: Value) -> ActionFuture<'_> {
        Box::pin(async move {
            log::debug!("executing remote action '{}' at {}", self.name, self.endpoint.url());
            let result = self
                .endpoint
                .execute_action(&self.name, input, &self.properties)
                .await
                .map_err(|e| ActionError::Remote(e.to_string()))?;
            Ok(ActionResult::Json(result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn info() -> RemoteActionInfo {
        RemoteActionInfo {
            name: "lookup".into(),
            description: "Look up a record".into(),
            parameters: json!([{"name": "id", "type": "string"}]),
        }
    }

    #[tokio::test]
    async fn test_remote_action_posts_and_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/copilotkit/actions/execute"))
            .and(body_partial_json(json!({"name": "lookup", "arguments": {"id": "42"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"found": true}})))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Arc::new(RemoteEndpoint::new(format!("{}/copilotkit", server.uri())));
        let action = RemoteEndpointAction::new(endpoint, &info());
        assert_eq!(action.parameters()["required"], json!(["id"]));

        let result = action.execute_raw(json!({"id": "42"})).await.unwrap();
        assert_eq!(result.into_content(), r#"{"found":true}"#);
    }

    #[tokio::test]
    async fn test_remote_action_http_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/actions/execute"))
            .respond_with(ResponseTemplate::new(500).set_body_string("exploded"))
            .mount(&server)
            .await;

        let action = RemoteEndpointAction::new(Arc::new(RemoteEndpoint::new(server.uri())), &info());
        let err = action.execute_raw(json!({"id": "1"})).await.unwrap_err();
        assert!(matches!(err, ActionError::Remote(msg) if msg.contains("500")));
    }
}
