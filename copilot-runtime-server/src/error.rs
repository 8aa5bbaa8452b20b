//! Error types for the runtime server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use copilot_runtime_core::RuntimeError;

/// Errors that can occur when building a router.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No endpoints were configured.
    #[error("No endpoints configured. Call .with_endpoint() before .build()")]
    NoEndpoints,

    #[error("Invalid endpoint path '{0}': paths must start with '/'")]
    InvalidPath(String),
}

/// Errors returned before a run starts streaming.
///
/// Once the stream is open, failures travel in-band as error frames.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The runtime refused to start the run.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// The request body could not be parsed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Runtime(e) => match e {
                RuntimeError::AgentNotFound(_) | RuntimeError::UnknownRun(_) => {
                    StatusCode::NOT_FOUND
                }
                RuntimeError::RunExists(_) => StatusCode::CONFLICT,
                RuntimeError::InvalidThread(_) | RuntimeError::MissingLocalHandler(_) => {
                    StatusCode::BAD_REQUEST
                }
                RuntimeError::NoAgentAvailable => StatusCode::SERVICE_UNAVAILABLE,
                RuntimeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        } else {
            log::debug!("request rejected: {self}");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
