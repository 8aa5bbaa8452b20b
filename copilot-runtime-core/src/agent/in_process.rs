//! An agent that runs its own tool loop inside the runtime process
//!
//! The agent calls its adapter, executes the tools it owns, feeds the
//! results back, and repeats until the model stops calling its tools.
//! Tool calls naming actions it does not own end its turn so the caller
//! can handle them.
//!
//! Tools marked as requiring approval interrupt the run with a
//! [`APPROVAL_INTERRUPT`] payload. Resuming with `{"approved": true}`
//! executes the call; anything else records a denial as the tool result.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{map_adapter_stream, Agent, AgentError, AgentEventStream, ResumeInput, RunHandle, RunInput};
use crate::action::dispatch::{self, error_content, ErrorCode};
use crate::action::{ActionRegistry, DynAction, ScopedActions};
use crate::adapter::{AdapterRequest, ServiceAdapter};
use crate::events::CanonicalEvent;
use crate::types::{new_id, Message, ToolCall};

/// `type` of the interrupt payload raised for tools that need approval
pub const APPROVAL_INTERRUPT: &str = "tool_approval";

const DEFAULT_MAX_ROUNDS: usize = 8;
const DEFAULT_MAX_PENDING: usize = 1000;

/// Answer to an approval interrupt
#[derive(Debug, Default, Deserialize)]
struct Approval {
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug)]
enum Decision {
    Approve(ToolCall),
    Deny(ToolCall, Option<String>),
}

/// Where an interrupted loop left off
struct LoopState {
    run: RunInput,
    messages: Vec<Message>,
    /// Owned tool calls still to execute, in order
    queued: Vec<ToolCall>,
    decision: Option<Decision>,
    /// The last response also called tools this agent does not own
    yield_after_tools: bool,
    round: usize,
}

/// Loops waiting for an approval
#[derive(Default)]
struct Pending {
    states: HashMap<String, LoopState>,
    /// Run ids, oldest first
    order: VecDeque<String>,
}

impl Pending {
    fn park(&mut self, run_id: String, state: LoopState, max: usize) {
        self.order.push_back(run_id.clone());
        self.states.insert(run_id, state);
        while self.order.len() > max {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            log::info!("dropping approval request of run {oldest}");
            self.states.remove(&oldest);
        }
    }

    fn take(&mut self, run_id: &str) -> Option<LoopState> {
        let state = self.states.remove(run_id)?;
        self.order.retain(|id| id != run_id);
        Some(state)
    }
}

struct Inner {
    name: String,
    description: String,
    adapter: Arc<dyn ServiceAdapter>,
    system_prompt: Option<String>,
    actions: Arc<ActionRegistry>,
    requires_approval: HashSet<String>,
    max_rounds: usize,
    max_pending: usize,
    pending: Mutex<Pending>,
}

/// Agent with its own actions and model loop
#[derive(Clone)]
pub struct InProcessAgent {
    inner: Arc<Inner>,
}

impl InProcessAgent {
    pub fn builder(name: impl Into<String>, adapter: Arc<dyn ServiceAdapter>) -> InProcessAgentBuilder {
        InProcessAgentBuilder {
            name: name.into(),
            description: String::new(),
            adapter,
            system_prompt: None,
            actions: ActionRegistry::new(),
            requires_approval: HashSet::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    /// Number of runs waiting for an approval
    pub fn pending_approvals(&self) -> usize {
        self.inner.pending.lock().states.len()
    }

    /// Forget the approval a run is waiting for
    pub fn discard_pending(&self, run_id: &str) -> bool {
        self.inner.pending.lock().take(run_id).is_some()
    }
}

impl std::fmt::Debug for InProcessAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessAgent")
            .field("name", &self.inner.name)
            .field("actions", &self.inner.actions.len())
            .finish_non_exhaustive()
    }
}

pub struct InProcessAgentBuilder {
    name: String,
    description: String,
    adapter: Arc<dyn ServiceAdapter>,
    system_prompt: Option<String>,
    actions: ActionRegistry,
    requires_approval: HashSet<String>,
    max_rounds: usize,
    max_pending: usize,
}

impl InProcessAgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn action(mut self, action: Arc<dyn DynAction>) -> Self {
        self.actions.register(action);
        self
    }

    /// Register an action that must be approved before each execution
    pub fn action_requiring_approval(mut self, action: Arc<dyn DynAction>) -> Self {
        self.requires_approval.insert(action.name().to_string());
        self.actions.register(action);
        self
    }

    /// Upper bound on model calls per run (or per resumed segment)
    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Runs kept waiting for an approval; the oldest is dropped past this
    pub fn max_pending(mut self, runs: usize) -> Self {
        self.max_pending = runs.max(1);
        self
    }

    pub fn build(self) -> InProcessAgent {
        InProcessAgent {
            inner: Arc::new(Inner {
                name: self.name,
                description: self.description,
                adapter: self.adapter,
                system_prompt: self.system_prompt,
                actions: Arc::new(self.actions),
                requires_approval: self.requires_approval,
                max_rounds: self.max_rounds,
                max_pending: self.max_pending,
                pending: Mutex::new(Pending::default()),
            }),
        }
    }
}

impl Inner {
    async fn execute(&self, call: &ToolCall) -> Message {
        let scoped = ScopedActions::new(self.actions.clone());
        match dispatch::execute(call, &scoped).await {
            Ok(message) => message,
            Err(e) => {
                log::error!("agent '{}' could not run its action '{}': {e}", self.name, call.name);
                Message::tool_result(&call.id, &call.name, error_content(ErrorCode::HandlerError, e.to_string()))
            }
        }
    }

    fn approval_payload(call: &ToolCall) -> Value {
        json!({
            "type": APPROVAL_INTERRUPT,
            "toolCallId": call.id,
            "name": call.name,
            "arguments": call.parsed_arguments().unwrap_or_else(|_| Value::String(call.arguments.clone())),
        })
    }

    fn tool_result_event(run_id: &str, message: &Message) -> Option<CanonicalEvent> {
        match message {
            Message::Tool {
                id,
                tool_call_id,
                content,
                ..
            } => Some(CanonicalEvent::ToolCallResult {
                run_id: run_id.to_string(),
                message_id: id.clone(),
                tool_call_id: tool_call_id.clone(),
                content: content.clone(),
            }),
            _ => None,
        }
    }

    fn request(&self, state: &LoopState) -> AdapterRequest {
        let mut actions = self.actions.definitions();
        actions.extend(
            state
                .run
                .actions
                .iter()
                .filter(|a| !self.actions.contains(&a.name))
                .cloned(),
        );
        AdapterRequest {
            thread_id: state.run.thread_id.clone(),
            run_id: state.run.run_id.clone(),
            messages: state.messages.clone(),
            actions,
            forwarded_parameters: state.run.forwarded_parameters.clone(),
        }
    }

    fn drive(self: Arc<Self>, mut state: LoopState) -> AgentEventStream {
        let this = self;
        async_stream::stream! {
            let run_id = state.run.run_id.clone();
            loop {
                if let Some(decision) = state.decision.take() {
                    let message = match decision {
                        Decision::Approve(call) => {
                            log::debug!("tool call {} approved", call.id);
                            this.execute(&call).await
                        }
                        Decision::Deny(call, reason) => {
                            let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                            Message::tool_result(
                                &call.id,
                                &call.name,
                                format!("Tool call was denied by the user: {reason}"),
                            )
                        }
                    };
                    if let Some(event) = Inner::tool_result_event(&run_id, &message) {
                        yield Ok(event);
                    }
                    state.messages.push(message);
                }

                while !state.queued.is_empty() {
                    let call = state.queued.remove(0);
                    if this.requires_approval.contains(&call.name) {
                        let payload = Inner::approval_payload(&call);
                        state.decision = Some(Decision::Approve(call));
                        this.pending.lock().park(run_id.clone(), state, this.max_pending);
                        yield Ok(CanonicalEvent::Interrupt { run_id: run_id.clone(), payload });
                        return;
                    }
                    let message = this.execute(&call).await;
                    if let Some(event) = Inner::tool_result_event(&run_id, &message) {
                        yield Ok(event);
                    }
                    state.messages.push(message);
                }

                if state.yield_after_tools {
                    return;
                }
                if state.round >= this.max_rounds {
                    log::warn!("agent '{}' stopped after {} model calls", this.name, state.round);
                    return;
                }

                let message_id = if state.round == 0 {
                    state.run.message_id.clone()
                } else {
                    new_id()
                };
                state.round += 1;

                let stream = match this.adapter.process(this.request(&state)).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        yield Err(AgentError::Adapter(e));
                        return;
                    }
                };
                let mut events = map_adapter_stream(stream, run_id.clone(), message_id.clone());

                let mut text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    match &event {
                        CanonicalEvent::TextDelta { delta, .. } => text.push_str(delta),
                        CanonicalEvent::ToolCallStart { tool_call_id, name, .. } => {
                            calls.push(ToolCall::new(tool_call_id.clone(), name.clone()));
                        }
                        CanonicalEvent::ToolCallArgsDelta { tool_call_id, delta, .. } => {
                            if let Some(call) = calls.iter_mut().find(|c| &c.id == tool_call_id) {
                                call.arguments.push_str(delta);
                            }
                        }
                        _ => {}
                    }
                    yield Ok(event);
                }

                state.messages.push(Message::Assistant {
                    id: message_id,
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: calls.clone(),
                    generative_ui: None,
                });
                if calls.is_empty() {
                    return;
                }

                let (owned, foreign): (Vec<ToolCall>, Vec<ToolCall>) =
                    calls.into_iter().partition(|c| this.actions.contains(&c.name));
                state.yield_after_tools = !foreign.is_empty();
                state.queued = owned;
            }
        }
        .boxed()
    }
}

#[async_trait::async_trait]
impl Agent for InProcessAgent {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        let mut messages = Vec::with_capacity(input.messages.len() + 1);
        if let Some(prompt) = &self.inner.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(input.messages.iter().cloned());

        let run_id = input.run_id.clone();
        let state = LoopState {
            run: input,
            messages,
            queued: Vec::new(),
            decision: None,
            yield_after_tools: false,
            round: 0,
        };
        Ok(RunHandle::new(run_id, self.inner.clone().drive(state)))
    }

    async fn resume(&self, input: ResumeInput) -> Result<RunHandle, AgentError> {
        let mut state = self
            .inner
            .pending
            .lock()
            .take(&input.parent_run_id)
            .ok_or_else(|| AgentError::UnknownRun(input.parent_run_id.clone()))?;

        let approval: Approval = serde_json::from_value(input.resolution.clone()).unwrap_or_else(|e| {
            log::warn!("unrecognized approval resolution, treating as denial: {e}");
            Approval::default()
        });
        state.decision = match state.decision.take() {
            Some(Decision::Approve(call)) | Some(Decision::Deny(call, _)) if approval.approved => {
                Some(Decision::Approve(call))
            }
            Some(Decision::Approve(call)) | Some(Decision::Deny(call, _)) => {
                Some(Decision::Deny(call, approval.reason))
            }
            None => None,
        };

        // the resumed segment runs under its own ids with a fresh round budget
        let run_id = input.run.run_id.clone();
        state.run.run_id = input.run.run_id;
        state.run.message_id = input.run.message_id;
        state.round = 0;
        Ok(RunHandle::new(run_id, self.inner.clone().drive(state)))
    }
}
