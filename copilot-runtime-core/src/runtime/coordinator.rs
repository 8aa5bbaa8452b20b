//! Drives one run from the first `ControlData` to the terminal `RunFinished`
//!
//! Agent events are forwarded in arrival order. When a completed tool call
//! names a locally handled action the agent stream is paused, the action is
//! dispatched, and its result is emitted before the next agent event. Once
//! the agent's stream ends, the assistant message and local results are
//! appended to the history and the agent is called again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{RunRecord, RuntimeInner};
use crate::action::{dispatch, ScopedActions};
use crate::adapter::ForwardedParameters;
use crate::agent::{Agent, AgentEventStream, ResumeInput, RunInput};
use crate::events::{CanonicalEvent, RunOutcome, RunStatus};
use crate::types::{new_id, ActionDefinition, Message, ToolCall};

/// The consumer is gone or the run was cancelled
pub(crate) struct Cancelled;

/// Everything the coordinator needs for one run
pub(crate) struct RunPlan {
    pub agent: Arc<dyn Agent>,
    pub thread_id: String,
    pub run_id: String,
    pub message_id: String,
    pub messages: Vec<Message>,
    /// Definitions advertised to the agent
    pub definitions: Vec<ActionDefinition>,
    /// Handlers the runtime executes itself
    pub actions: ScopedActions,
    pub state: Option<Value>,
    pub forwarded_parameters: ForwardedParameters,
    pub properties: Value,
    /// Parent run id and resolution when continuing an interrupted run
    pub resume: Option<(String, Value)>,
    /// The claimed parent, handed back if the agent fails before producing anything
    pub parent: Option<(String, RunRecord)>,
}

struct OpenCall {
    name: String,
    arguments: String,
}

/// What one agent invocation produced
#[derive(Default)]
struct Turn {
    text: String,
    open: HashMap<String, OpenCall>,
    completed: Vec<ToolCall>,
    results: Vec<Message>,
    local_results: usize,
    interrupted: bool,
}

impl Turn {
    fn is_known(&self, tool_call_id: &str) -> bool {
        self.open.contains_key(tool_call_id) || self.completed.iter().any(|c| c.id == tool_call_id)
    }

    fn all_answered(&self) -> bool {
        self.completed.iter().all(|call| {
            self.results
                .iter()
                .any(|r| matches!(r, Message::Tool { tool_call_id, .. } if *tool_call_id == call.id))
        })
    }

    fn assistant_message(&self, message_id: &str) -> Option<Message> {
        if self.text.is_empty() && self.completed.is_empty() {
            return None;
        }
        Some(Message::Assistant {
            id: message_id.to_string(),
            content: (!self.text.is_empty()).then(|| self.text.clone()),
            tool_calls: self.completed.clone(),
            generative_ui: None,
        })
    }
}

enum Step {
    Forward,
    Skip,
    Dispatch(ToolCall),
    Interrupt,
    Fail(String),
}

pub(crate) struct Coordinator {
    plan: RunPlan,
    shared: Arc<RuntimeInner>,
    tx: mpsc::Sender<CanonicalEvent>,
    cancel: CancellationToken,
    /// Agent events forwarded so far
    forwarded: usize,
}

impl Coordinator {
    pub fn new(
        plan: RunPlan,
        shared: Arc<RuntimeInner>,
        tx: mpsc::Sender<CanonicalEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            shared,
            tx,
            cancel,
            forwarded: 0,
        }
    }

    /// Give the parent back to the tracker when a resume produced nothing
    fn release_parent(&mut self, outcome: RunOutcome) {
        let Some((parent_run_id, parent)) = self.plan.parent.take() else {
            return;
        };
        if self.forwarded == 0 && matches!(outcome, RunOutcome::Errored | RunOutcome::Cancelled) {
            log::info!(
                "resume of run {parent_run_id} failed before the agent answered, it can be resumed again"
            );
            self.shared.tracker.restore_interrupted(&parent_run_id, parent);
        }
    }

    pub async fn run(mut self) {
        let run_id = self.plan.run_id.clone();
        match self.drive().await {
            Ok(outcome) => {
                self.shared.tracker.transition(&run_id, outcome.into());
                self.release_parent(outcome);
                let finished = CanonicalEvent::RunFinished {
                    run_id: run_id.clone(),
                    outcome,
                };
                if self.emit(finished.clone()).await.is_err() {
                    log::debug!("run {run_id} finished after cancellation");
                    self.shared.notify(&finished);
                    let _ = self.tx.try_send(finished);
                }
                log::debug!("run {run_id} finished: {outcome:?}");
            }
            Err(Cancelled) => {
                log::info!("run {run_id} cancelled");
                self.shared.tracker.transition(&run_id, RunStatus::Cancelled);
                self.release_parent(RunOutcome::Cancelled);
                let finished = CanonicalEvent::RunFinished {
                    run_id,
                    outcome: RunOutcome::Cancelled,
                };
                self.shared.notify(&finished);
                let _ = self.tx.try_send(finished);
            }
        }
    }

    async fn until_cancelled<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }

    async fn emit(&self, event: CanonicalEvent) -> Result<(), Cancelled> {
        let sent = self.until_cancelled(self.tx.send(event.clone())).await?;
        sent.map_err(|_| Cancelled)?;
        self.shared.notify(&event);
        Ok(())
    }

    async fn fail(&self, message: String) -> Result<RunOutcome, Cancelled> {
        log::warn!("run {} failed: {message}", self.plan.run_id);
        self.emit(CanonicalEvent::Error {
            run_id: self.plan.run_id.clone(),
            message,
        })
        .await?;
        Ok(RunOutcome::Errored)
    }

    fn input(&self, message_id: &str) -> RunInput {
        RunInput {
            thread_id: self.plan.thread_id.clone(),
            run_id: self.plan.run_id.clone(),
            message_id: message_id.to_string(),
            messages: self.plan.messages.clone(),
            actions: self.plan.definitions.clone(),
            state: self.plan.state.clone(),
            forwarded_parameters: self.plan.forwarded_parameters.clone(),
            properties: self.plan.properties.clone(),
        }
    }

    async fn drive(&mut self) -> Result<RunOutcome, Cancelled> {
        self.emit(CanonicalEvent::ControlData {
            thread_id: self.plan.thread_id.clone(),
            run_id: self.plan.run_id.clone(),
            message_id: self.plan.message_id.clone(),
        })
        .await?;

        let agent = self.plan.agent.clone();
        let max_rounds = self.shared.config.max_tool_rounds;
        let mut resume = self.plan.resume.take();

        for round in 0..max_rounds {
            let message_id = if round == 0 {
                self.plan.message_id.clone()
            } else {
                new_id()
            };
            let input = self.input(&message_id);
            let started = match resume.take() {
                Some((parent_run_id, resolution)) => {
                    log::debug!(
                        "resuming run {parent_run_id} as {} on agent '{}'",
                        self.plan.run_id,
                        agent.name()
                    );
                    let input = ResumeInput {
                        run: input,
                        parent_run_id,
                        resolution,
                    };
                    self.until_cancelled(agent.resume(input)).await?
                }
                None => self.until_cancelled(agent.start(input)).await?,
            };
            let handle = match started {
                Ok(handle) => handle,
                Err(e) => return self.fail(e.to_string()).await,
            };
            if round == 0 {
                self.shared
                    .tracker
                    .transition(&self.plan.run_id, RunStatus::Streaming);
            }

            let mut turn = Turn::default();
            if let Some(outcome) = self.consume(handle.into_stream(), &mut turn).await? {
                return Ok(outcome);
            }

            if let Some(message) = turn.assistant_message(&message_id) {
                if self.shared.config.emit_message_snapshots {
                    self.emit(CanonicalEvent::AssistantMessage {
                        run_id: self.plan.run_id.clone(),
                        message: message.clone(),
                    })
                    .await?;
                }
                self.plan.messages.push(message);
            }
            let answered = turn.all_answered();
            let local_results = turn.local_results;
            self.plan.messages.extend(turn.results);

            if turn.interrupted {
                return Ok(RunOutcome::Interrupted);
            }
            if local_results == 0 || !answered {
                return Ok(RunOutcome::Completed);
            }
            if round + 1 == max_rounds {
                log::warn!(
                    "run {} stopped after {max_rounds} tool round(s)",
                    self.plan.run_id
                );
            }
        }
        Ok(RunOutcome::Completed)
    }

    /// Forward one agent stream; `Some` means the run ended with an error
    async fn consume(
        &mut self,
        mut events: AgentEventStream,
        turn: &mut Turn,
    ) -> Result<Option<RunOutcome>, Cancelled> {
        while let Some(next) = self.until_cancelled(events.next()).await? {
            let event = match next {
                Ok(event) => event.with_run_id(&self.plan.run_id),
                Err(e) => return self.fail(e.to_string()).await.map(Some),
            };
            match self.observe(&event, turn) {
                Step::Forward => {
                    self.forwarded += 1;
                    self.emit(event).await?;
                }
                Step::Skip => {}
                Step::Dispatch(call) => {
                    self.forwarded += 1;
                    self.emit(event).await?;
                    if let Some(outcome) = self.dispatch(call, turn).await? {
                        return Ok(Some(outcome));
                    }
                }
                Step::Interrupt => {
                    self.forwarded += 1;
                    self.emit(event).await?;
                    turn.interrupted = true;
                    break;
                }
                Step::Fail(message) => return self.fail(message).await.map(Some),
            }
        }

        if !turn.interrupted && !turn.open.is_empty() {
            let mut ids: Vec<&str> = turn.open.keys().map(String::as_str).collect();
            ids.sort_unstable();
            let message = format!("agent stream ended with unterminated tool call(s): {}", ids.join(", "));
            return self.fail(message).await.map(Some);
        }
        Ok(None)
    }

    fn observe(&mut self, event: &CanonicalEvent, turn: &mut Turn) -> Step {
        match event {
            CanonicalEvent::TextDelta { delta, .. } => {
                turn.text.push_str(delta);
                Step::Forward
            }
            CanonicalEvent::ToolCallStart {
                tool_call_id, name, ..
            } => {
                if turn.is_known(tool_call_id) {
                    log::warn!("skipping duplicate start of tool call {tool_call_id}");
                    return Step::Skip;
                }
                turn.open.insert(
                    tool_call_id.clone(),
                    OpenCall {
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
                Step::Forward
            }
            CanonicalEvent::ToolCallArgsDelta {
                tool_call_id, delta, ..
            } => match turn.open.get_mut(tool_call_id) {
                Some(call) => {
                    call.arguments.push_str(delta);
                    Step::Forward
                }
                None => {
                    log::warn!("skipping arguments for unknown tool call {tool_call_id}");
                    Step::Skip
                }
            },
            CanonicalEvent::ToolCallEnd { tool_call_id, .. } => {
                let Some(open) = turn.open.remove(tool_call_id) else {
                    log::warn!("skipping end of unknown tool call {tool_call_id}");
                    return Step::Skip;
                };
                let call = ToolCall::new(tool_call_id, open.name).with_arguments(open.arguments);
                turn.completed.push(call.clone());
                if self.plan.actions.contains(&call.name) {
                    Step::Dispatch(call)
                } else {
                    Step::Forward
                }
            }
            CanonicalEvent::ToolCallResult {
                message_id,
                tool_call_id,
                content,
                ..
            } => {
                let name = turn
                    .completed
                    .iter()
                    .find(|c| c.id == *tool_call_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let mut result = Message::tool_result(tool_call_id, name, content);
                if let Message::Tool { id, .. } = &mut result {
                    id.clone_from(message_id);
                }
                turn.results.push(result);
                Step::Forward
            }
            CanonicalEvent::StateDelta { patch, .. } => {
                let state = self.plan.state.get_or_insert_with(|| Value::Object(Default::default()));
                if let Err(e) = json_patch::patch(state, patch) {
                    log::debug!("state delta does not apply to tracked state: {e}");
                }
                Step::Forward
            }
            CanonicalEvent::Interrupt { .. } => Step::Interrupt,
            CanonicalEvent::AssistantMessage { .. } => Step::Forward,
            CanonicalEvent::Error { message, .. } => Step::Fail(message.clone()),
            CanonicalEvent::ControlData { .. } | CanonicalEvent::RunFinished { .. } => {
                log::trace!("dropping agent lifecycle event for run {}", self.plan.run_id);
                Step::Skip
            }
        }
    }

    async fn dispatch(
        &mut self,
        call: ToolCall,
        turn: &mut Turn,
    ) -> Result<Option<RunOutcome>, Cancelled> {
        log::debug!("dispatching local action '{}' ({})", call.name, call.id);
        let executed = self
            .until_cancelled(dispatch::execute(&call, &self.plan.actions))
            .await?;
        let result = match executed {
            Ok(result) => result,
            Err(e) => {
                log::error!("local dispatch of '{}' failed: {e}", call.name);
                return self.fail(e.to_string()).await.map(Some);
            }
        };
        self.emit(CanonicalEvent::ToolCallResult {
            run_id: self.plan.run_id.clone(),
            message_id: result.id().to_string(),
            tool_call_id: call.id.clone(),
            content: result.text().unwrap_or_default().to_string(),
        })
        .await?;
        turn.results.push(result);
        turn.local_results += 1;
        Ok(None)
    }
}
