//! Top-level error type for the runtime
//!
//! Each layer has its own error enum. This module flattens them into the
//! categories callers actually branch on.

use thiserror::Error;

use crate::action::{ActionError, DispatchError};
use crate::adapter::AdapterError;
use crate::agent::AgentError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::runtime::RuntimeError;

/// Flattened error for runtime operations
///
/// - [`Error::Auth`] - Fix credentials and retry
/// - [`Error::RateLimited`] - Back off and retry
/// - [`Error::Transport`] - Connection to a backend failed
/// - [`Error::Unavailable`] - Backend is down, wait and retry
/// - [`Error::Protocol`] - A backend or client broke the wire protocol
/// - [`Error::Action`] - An action handler failed
/// - [`Error::NotFound`] - Unknown agent or run
/// - [`Error::InvalidRequest`] - The request itself is unusable
/// - [`Error::Config`] - Fix configuration or registration
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("action error: {0}")]
    Action(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_action(&self) -> bool {
        matches!(self, Self::Action(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if a later attempt may succeed without changes
    ///
    /// The runtime itself never retries; this is for callers deciding
    /// whether to resubmit a request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Transport(_) | Self::Unavailable(_)
        )
    }

    fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimited(message),
            404 => Self::NotFound(message),
            500..=599 => Self::Unavailable(message),
            _ => Self::Other(format!("HTTP {status}: {message}")),
        }
    }
}

impl From<AdapterError> for Error {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Http { status, message } => Self::from_status(status, message),
            AdapterError::Network(msg) => Self::Transport(msg),
            AdapterError::InvalidResponse(msg) => Self::Protocol(msg),
            AdapterError::Configuration(msg) => Self::Config(msg),
            AdapterError::Other(msg) => Self::Other(msg),
        }
    }
}

impl From<AgentError> for Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Transport(msg) => Self::Transport(msg),
            AgentError::Http { status, body } => Self::from_status(status, body),
            AgentError::Protocol(msg) => Self::Protocol(msg),
            AgentError::Adapter(e) => e.into(),
            e @ AgentError::ResumeUnsupported(_) => Self::InvalidRequest(e.to_string()),
            e @ AgentError::UnknownRun(_) => Self::NotFound(e.to_string()),
            AgentError::Configuration(msg) => Self::Config(msg),
            AgentError::Other(msg) => Self::Other(msg),
        }
    }
}

impl From<ActionError> for Error {
    fn from(err: ActionError) -> Self {
        Self::Action(err.to_string())
    }
}

impl From<DispatchError> for Error {
    fn from(err: DispatchError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<RuntimeError> for Error {
    fn from(err: RuntimeError) -> Self {
        match err {
            e @ (RuntimeError::AgentNotFound(_) | RuntimeError::UnknownRun(_)) => {
                Self::NotFound(e.to_string())
            }
            e @ (RuntimeError::RunExists(_) | RuntimeError::InvalidThread(_)) => {
                Self::InvalidRequest(e.to_string())
            }
            e @ (RuntimeError::NoAgentAvailable | RuntimeError::MissingLocalHandler(_)) => {
                Self::Config(e.to_string())
            }
            RuntimeError::Config(e) => e.into(),
        }
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;
