use std::sync::Arc;

use futures::StreamExt;

use super::{Agent, AgentError, AgentEventStream, RunHandle, RunInput};
use crate::adapter::{AdapterChunk, AdapterRequest, AdapterStream, ServiceAdapter};
use crate::events::CanonicalEvent;

/// Translate adapter chunks into canonical events for one assistant message
pub fn map_adapter_stream(
    stream: AdapterStream,
    run_id: impl Into<String>,
    message_id: impl Into<String>,
) -> AgentEventStream {
    let run_id = run_id.into();
    let message_id = message_id.into();
    stream
        .filter_map(move |chunk| {
            let event = match chunk {
                Ok(AdapterChunk::TextDelta(delta)) => Some(Ok(CanonicalEvent::TextDelta {
                    run_id: run_id.clone(),
                    message_id: message_id.clone(),
                    delta,
                })),
                Ok(AdapterChunk::ToolCallStart { id, name }) => Some(Ok(CanonicalEvent::ToolCallStart {
                    run_id: run_id.clone(),
                    tool_call_id: id,
                    name,
                    parent_message_id: Some(message_id.clone()),
                })),
                Ok(AdapterChunk::ToolCallArgs { id, delta }) => {
                    Some(Ok(CanonicalEvent::ToolCallArgsDelta {
                        run_id: run_id.clone(),
                        tool_call_id: id,
                        delta,
                    }))
                }
                Ok(AdapterChunk::ToolCallEnd { id }) => Some(Ok(CanonicalEvent::ToolCallEnd {
                    run_id: run_id.clone(),
                    tool_call_id: id,
                })),
                Ok(AdapterChunk::Finish { reason }) => {
                    log::trace!("adapter finished: {reason:?}");
                    None
                }
                Err(e) => Some(Err(AgentError::Adapter(e))),
            };
            futures::future::ready(event)
        })
        .boxed()
}

/// The default agent: a single LLM call through a service adapter
///
/// Tool calls are streamed back to the coordinator, which executes local
/// actions and calls the agent again with the results.
#[derive(Clone)]
pub struct AdapterAgent {
    name: String,
    adapter: Arc<dyn ServiceAdapter>,
}

impl AdapterAgent {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            name: name.into(),
            adapter,
        }
    }
}

impl std::fmt::Debug for AdapterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterAgent")
            .field("name", &self.name)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

#[async_trait::async_trait]
impl Agent for AdapterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, input: RunInput) -> Result<RunHandle, AgentError> {
        let request = AdapterRequest {
            thread_id: input.thread_id,
            run_id: input.run_id.clone(),
            messages: input.messages,
            actions: input.actions,
            forwarded_parameters: input.forwarded_parameters,
        };
        let stream = self.adapter.process(request).await?;
        let events = map_adapter_stream(stream, input.run_id.clone(), input.message_id);
        Ok(RunHandle::new(input.run_id, events))
    }
}
