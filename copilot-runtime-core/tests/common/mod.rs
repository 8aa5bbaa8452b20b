//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use copilot_runtime_core::action::{Action, ActionError, ActionResult};
use copilot_runtime_core::test_utils::{event_type_name, ScriptStep};
use copilot_runtime_core::{CanonicalEvent, RunOutcome, RuntimeRun};
use futures::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Run Helpers =====

pub async fn collect(run: RuntimeRun) -> Vec<CanonicalEvent> {
    run.into_stream().collect().await
}

pub fn types(events: &[CanonicalEvent]) -> Vec<&'static str> {
    events.iter().map(event_type_name).collect()
}

pub fn outcome(events: &[CanonicalEvent]) -> Option<RunOutcome> {
    match events.last() {
        Some(CanonicalEvent::RunFinished { outcome, .. }) => Some(*outcome),
        _ => None,
    }
}

pub fn text_of(events: &[CanonicalEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

// ===== Script Steps =====

pub fn text(delta: &str) -> ScriptStep {
    ScriptStep::Emit(CanonicalEvent::TextDelta {
        run_id: String::new(),
        message_id: "m".into(),
        delta: delta.into(),
    })
}

pub fn tool_start(id: &str, name: &str) -> ScriptStep {
    ScriptStep::Emit(CanonicalEvent::ToolCallStart {
        run_id: String::new(),
        tool_call_id: id.into(),
        name: name.into(),
        parent_message_id: None,
    })
}

pub fn tool_args(id: &str, delta: &str) -> ScriptStep {
    ScriptStep::Emit(CanonicalEvent::ToolCallArgsDelta {
        run_id: String::new(),
        tool_call_id: id.into(),
        delta: delta.into(),
    })
}

pub fn tool_end(id: &str) -> ScriptStep {
    ScriptStep::Emit(CanonicalEvent::ToolCallEnd {
        run_id: String::new(),
        tool_call_id: id.into(),
    })
}

// ===== Typed Actions =====

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct MultiplyInput {
    pub a: i64,
    pub b: i64,
}

/// Typed action with a derived schema
pub struct Multiply;

impl Action for Multiply {
    type Input = MultiplyInput;

    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two integers"
    }

    async fn execute(&self, input: MultiplyInput) -> Result<ActionResult, ActionError> {
        Ok((input.a * input.b).to_string().into())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransferInput {
    pub amount: u64,
    pub to: String,
}

/// Action that should only run after a person approves it
pub struct Transfer;

impl Action for Transfer {
    type Input = TransferInput;

    fn name(&self) -> &str {
        "transfer"
    }

    fn description(&self) -> &str {
        "Move money to another account"
    }

    async fn execute(&self, input: TransferInput) -> Result<ActionResult, ActionError> {
        Ok(format!("sent {} to {}", input.amount, input.to).into())
    }
}
