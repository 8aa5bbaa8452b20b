//! Execution of locally registered actions for a completed tool call

use serde::Serialize;
use serde_json::{json, Value};

use super::ScopedActions;
use crate::types::{Message, ToolCall};

/// Failures that must not be hidden from the operator
///
/// Anything the model can recover from is returned as an error-content
/// tool result instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A tool call names a local action that has no registered handler
    #[error("no handler registered for local action '{0}'")]
    MissingHandler(String),

    /// The action's declared schema does not compile
    #[error("invalid parameter schema for action '{name}': {message}")]
    InvalidSchema { name: String, message: String },
}

/// Error codes carried in error-content tool results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Arguments are not valid JSON
    InvalidArguments,
    /// Arguments do not satisfy the parameter schema
    ValidationFailed,
    /// The handler returned an error or panicked
    HandlerError,
}

/// Encode an error as tool-result content
pub fn error_content(code: ErrorCode, message: impl Into<String>) -> String {
    json!({ "error": { "code": code, "message": message.into() } }).to_string()
}

fn validate(name: &str, schema: &Value, args: &Value) -> Result<Option<String>, DispatchError> {
    let validator = jsonschema::options()
        .build(schema)
        .map_err(|e| DispatchError::InvalidSchema {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    if validator.is_valid(args) {
        return Ok(None);
    }
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("- {e}"))
        .collect();
    Ok(Some(format!(
        "schema validation failed:\n{}",
        errors.join("\n")
    )))
}

/// Execute a completed tool call against its registered handler
///
/// Returns the tool-result message to append to the conversation. Invalid
/// arguments and handler failures, panics included, become error content so
/// the model can react. The handler runs on its own task; dropping the
/// returned future detaches it rather than aborting it.
pub async fn execute(call: &ToolCall, actions: &ScopedActions) -> Result<Message, DispatchError> {
    let action = actions
        .get(&call.name)
        .cloned()
        .ok_or_else(|| DispatchError::MissingHandler(call.name.clone()))?;

    let result = |content: String| Message::tool_result(&call.id, &call.name, content);

    let args = match call.parsed_arguments() {
        Ok(args) => args,
        Err(e) => {
            log::warn!("tool call {} ({}) has unparsable arguments: {e}", call.id, call.name);
            return Ok(result(error_content(
                ErrorCode::InvalidArguments,
                format!("arguments are not valid JSON: {e}"),
            )));
        }
    };

    if let Some(message) = validate(&call.name, &action.parameters(), &args)? {
        log::debug!("tool call {} ({}) failed validation", call.id, call.name);
        return Ok(result(error_content(ErrorCode::ValidationFailed, message)));
    }

    let handle = tokio::spawn(async move { action.execute_raw(args).await });
    let content = match handle.await {
        Ok(Ok(output)) => output.into_content(),
        Ok(Err(e)) => {
            log::warn!("action '{}' failed: {e}", call.name);
            error_content(ErrorCode::HandlerError, e.to_string())
        }
        Err(join_err) => {
            log::error!("action '{}' panicked: {join_err}", call.name);
            error_content(ErrorCode::HandlerError, "handler panicked")
        }
    };
    Ok(result(content))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::action::{ActionError, ActionRegistry, ActionResult, DynAction, FnAction};

    fn scoped(actions: Vec<Arc<dyn DynAction>>) -> ScopedActions {
        let mut registry = ActionRegistry::new();
        for action in actions {
            registry.register(action);
        }
        ScopedActions::new(Arc::new(registry))
    }

    fn adder(calls: Arc<AtomicUsize>) -> Arc<dyn DynAction> {
        FnAction::new("add", "Add numbers", move |input: Value| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let a = input["a"].as_i64().unwrap_or_default();
                let b = input["b"].as_i64().unwrap_or_default();
                Ok(ActionResult::Json(json!({ "sum": a + b })))
            }
        })
        .with_parameters(json!({
            "type": "object",
            "properties": { "a": {"type": "integer"}, "b": {"type": "integer"} },
            "required": ["a", "b"]
        }))
        .boxed()
    }

    fn content(msg: &Message) -> Value {
        serde_json::from_str(msg.text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let actions = scoped(vec![adder(calls.clone())]);
        let call = ToolCall::new("c1", "add").with_arguments(r#"{"a":2,"b":3}"#);

        let msg = execute(&call, &actions).await.unwrap();
        match &msg {
            Message::Tool {
                tool_call_id, name, ..
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(name, "add");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
        assert_eq!(content(&msg), json!({"sum": 5}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_is_loud() {
        let actions = scoped(vec![]);
        let call = ToolCall::new("c1", "ghost");
        let err = execute(&call, &actions).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingHandler(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_schema_violation_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let actions = scoped(vec![adder(calls.clone())]);
        let call = ToolCall::new("c1", "add").with_arguments(r#"{"a":"two"}"#);

        let msg = execute(&call, &actions).await.unwrap();
        assert_eq!(content(&msg)["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparsable_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let actions = scoped(vec![adder(calls.clone())]);
        let call = ToolCall::new("c1", "add").with_arguments(r#"{"a":1,"#);

        let msg = execute(&call, &actions).await.unwrap();
        assert_eq!(content(&msg)["error"]["code"], "INVALID_ARGUMENTS");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_contained() {
        let failing = FnAction::new("fail", "", |_| async {
            Err::<ActionResult, _>(ActionError::Custom("disk full".into()))
        })
        .boxed();
        let panicking = FnAction::new("explode", "", |_| async {
            if true {
                panic!("boom");
            }
            Ok(ActionResult::text("unreachable"))
        })
        .boxed();
        let actions = scoped(vec![failing, panicking]);

        let msg = execute(&ToolCall::new("c1", "fail"), &actions).await.unwrap();
        let body = content(&msg);
        assert_eq!(body["error"]["code"], "HANDLER_ERROR");
        assert_eq!(body["error"]["message"], "disk full");

        let msg = execute(&ToolCall::new("c2", "explode"), &actions).await.unwrap();
        assert_eq!(content(&msg)["error"]["code"], "HANDLER_ERROR");
    }
}
