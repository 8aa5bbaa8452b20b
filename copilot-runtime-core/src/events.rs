use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Message;

/// Events emitted by the run coordinator toward the transport endpoint
///
/// For a given run the sequence is well nested: every `ToolCallEnd` is
/// preceded by the matching `ToolCallStart`, and a tool call id is never
/// started twice while open. `TextDelta` chunks for one message id are
/// order significant.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    /// Incremental assistant text
    TextDelta {
        run_id: String,
        message_id: String,
        delta: String,
    },

    /// A tool call began streaming
    ToolCallStart {
        run_id: String,
        tool_call_id: String,
        name: String,
        /// Assistant message the call belongs to, if known
        parent_message_id: Option<String>,
    },

    /// Raw argument text for an open tool call
    ToolCallArgsDelta {
        run_id: String,
        tool_call_id: String,
        delta: String,
    },

    /// The tool call's arguments are complete
    ToolCallEnd { run_id: String, tool_call_id: String },

    /// Result of a tool call executed by the runtime
    ToolCallResult {
        run_id: String,
        message_id: String,
        tool_call_id: String,
        content: String,
    },

    /// RFC 6902 patch against the agent's shared state
    StateDelta {
        run_id: String,
        agent_name: String,
        patch: Patch,
    },

    /// Correlation ids; always the first event of a run
    ControlData {
        thread_id: String,
        run_id: String,
        message_id: String,
    },

    /// The run needs external input before it can continue
    Interrupt { run_id: String, payload: Value },

    /// Snapshot of a completed assistant message
    AssistantMessage { run_id: String, message: Message },

    Error { run_id: String, message: String },

    /// Terminal event of a run
    RunFinished { run_id: String, outcome: RunOutcome },
}

impl CanonicalEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::TextDelta { run_id, .. }
            | Self::ToolCallStart { run_id, .. }
            | Self::ToolCallArgsDelta { run_id, .. }
            | Self::ToolCallEnd { run_id, .. }
            | Self::ToolCallResult { run_id, .. }
            | Self::StateDelta { run_id, .. }
            | Self::ControlData { run_id, .. }
            | Self::Interrupt { run_id, .. }
            | Self::AssistantMessage { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }

    /// Replace the run id, used when an agent is driven under a coordinator-assigned id
    pub fn with_run_id(mut self, id: &str) -> Self {
        match &mut self {
            Self::TextDelta { run_id, .. }
            | Self::ToolCallStart { run_id, .. }
            | Self::ToolCallArgsDelta { run_id, .. }
            | Self::ToolCallEnd { run_id, .. }
            | Self::ToolCallResult { run_id, .. }
            | Self::StateDelta { run_id, .. }
            | Self::ControlData { run_id, .. }
            | Self::Interrupt { run_id, .. }
            | Self::AssistantMessage { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id = id.to_string(),
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. })
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Errored,
    Interrupted,
    Cancelled,
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Streaming,
    Finished,
    Errored,
    Interrupted,
    Cancelled,
}

impl RunStatus {
    /// Whether the state machine permits moving to `next`
    ///
    /// `Pending -> Streaming -> {Finished | Errored | Interrupted | Cancelled}`,
    /// with `Interrupted -> Streaming` on resume. A pending run may also fail
    /// or be cancelled before the first chunk arrives.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Streaming)
                | (Pending, Errored)
                | (Pending, Cancelled)
                | (Streaming, Finished)
                | (Streaming, Errored)
                | (Streaming, Interrupted)
                | (Streaming, Cancelled)
                | (Interrupted, Streaming)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Cancelled)
    }
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => Self::Finished,
            RunOutcome::Errored => Self::Errored,
            RunOutcome::Interrupted => Self::Interrupted,
            RunOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Hook for observing events the runtime emits
///
/// Hooks see every event of every run, including the terminal
/// `RunFinished` of a cancelled run that is never delivered to the client.
///
/// # Example
/// ```
/// use copilot_runtime_core::events::{CanonicalEvent, RuntimeHook};
///
/// struct Logger;
///
/// impl RuntimeHook for Logger {
///     fn on_event(&self, event: &CanonicalEvent) {
///         if let CanonicalEvent::RunFinished { run_id, outcome } = event {
///             println!("{run_id} finished: {outcome:?}");
///         }
///     }
/// }
/// ```
pub trait RuntimeHook: Send + Sync {
    fn on_event(&self, event: &CanonicalEvent);
}

impl<F> RuntimeHook for F
where
    F: Fn(&CanonicalEvent) + Send + Sync,
{
    fn on_event(&self, event: &CanonicalEvent) {
        self(event)
    }
}

/// Unique identifier for a registered hook.
///
/// Used to remove hooks via [`crate::CopilotRuntime::remove_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use RunStatus::*;
        let allowed = [
            (Pending, Streaming),
            (Streaming, Finished),
            (Streaming, Errored),
            (Streaming, Interrupted),
            (Interrupted, Streaming),
            (Streaming, Cancelled),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }

        let rejected = [
            (Finished, Streaming),
            (Errored, Streaming),
            (Interrupted, Finished),
            (Pending, Interrupted),
            (Cancelled, Streaming),
        ];
        for (from, to) in rejected {
            assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn test_with_run_id_rewrites_every_variant() {
        let event = CanonicalEvent::ToolCallEnd {
            run_id: "a".into(),
            tool_call_id: "c1".into(),
        };
        assert_eq!(event.with_run_id("b").run_id(), "b");
    }

    #[test]
    fn test_closure_hook() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = move |event: &CanonicalEvent| sink.lock().push(event.run_id().to_string());

        hook.on_event(&CanonicalEvent::Error {
            run_id: "r1".into(),
            message: "boom".into(),
        });
        assert_eq!(*seen.lock(), vec!["r1".to_string()]);
    }
}
