//! Actions the runtime can execute on behalf of an agent
//!
//! Implement [`Action`] for typed handlers with a derived schema, or use
//! [`FnAction`] for a closure with an explicit JSON schema. Both are stored
//! as [`DynAction`] trait objects in an [`ActionRegistry`].

pub mod dispatch;
pub mod registry;
pub mod remote;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ActionAvailability, ActionDefinition};

pub use dispatch::{execute, DispatchError, ErrorCode};
pub use registry::{ActionRegistry, ScopedActions};
pub use remote::RemoteEndpointAction;

/// Value returned by an action handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionResult {
    /// Sent to the model verbatim
    Text(String),
    /// Serialized to a JSON string
    Json(Value),
}

impl ActionResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn json<T: Serialize>(value: T) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Tool-result content as it is injected into the conversation
    pub fn into_content(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Json(Value::String(s)) => s,
            Self::Json(v) => v.to_string(),
        }
    }
}

impl From<String> for ActionResult {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ActionResult {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for ActionResult {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

/// Errors raised by action handlers
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("remote endpoint error: {0}")]
    Remote(String),

    #[error("{0}")]
    Custom(String),
}

impl From<String> for ActionError {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

impl From<&str> for ActionError {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_string())
    }
}

/// A locally executed action with a typed input
///
/// ```rust
/// use copilot_runtime_core::action::{Action, ActionError, ActionResult};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct AddInput {
///     a: i64,
///     b: i64,
/// }
///
/// struct Add;
///
/// impl Action for Add {
///     type Input = AddInput;
///
///     fn name(&self) -> &str { "add" }
///     fn description(&self) -> &str { "Add two integers" }
///
///     fn execute(&self, input: AddInput) -> impl std::future::Future<Output = Result<ActionResult, ActionError>> + Send {
///         async move { Ok((input.a + input.b).to_string().into()) }
///     }
/// }
/// ```
pub trait Action: Send + Sync {
    type Input: DeserializeOwned + JsonSchema;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<ActionResult, ActionError>> + Send;

    /// JSON schema of the input, derived from `Input`
    fn parameters(&self) -> Value {
        let schema = schemars::schema_for!(Self::Input);
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<ActionResult, ActionError>> + Send + 'a>>;

/// Object-safe form of an action, used for storage and dispatch
pub trait DynAction: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    fn execute_raw(&self, input: Value) -> ActionFuture<'_>;

    fn availability(&self) -> ActionAvailability {
        ActionAvailability::Local
    }

    fn definition(&self) -> ActionDefinition {
        ActionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            availability: self.availability(),
        }
    }
}

/// Convert an [`Action`] into a shareable trait object
pub fn box_action<A: Action + 'static>(action: A) -> Arc<dyn DynAction> {
    Arc::new(ActionWrapper(action))
}

/// Create a `Vec<Arc<dyn DynAction>>` from heterogeneous action types.
///
/// ```ignore
/// let runtime = CopilotRuntime::builder()
///     .actions(box_actions![Add, Lookup])
///     .build()?;
/// ```
#[macro_export]
macro_rules! box_actions {
    ($($action:expr),* $(,)?) => {
        vec![$($crate::action::box_action($action)),*]
    };
}

struct ActionWrapper<A>(A);

impl<A: Action + 'static> DynAction for ActionWrapper<A> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters(&self) -> Value {
        self.0.parameters()
    }

    fn execute_raw(&self, input: Value) -> ActionFuture<'_> {
        Box::pin(async move {
            let typed: A::Input = serde_json::from_value(input)
                .map_err(|e| ActionError::InvalidInput(e.to_string()))?;
            self.0.execute(typed).await
        })
    }
}

type Handler = dyn Fn(Value) -> ActionFuture<'static> + Send + Sync;

/// A closure-backed action with an explicit parameter schema
pub struct FnAction {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<Handler>,
}

impl FnAction {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn boxed(self) -> Arc<dyn DynAction> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DynAction for FnAction {
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
        (self.handler)(input)
    }
}
