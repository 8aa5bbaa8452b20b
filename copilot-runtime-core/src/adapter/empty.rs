use futures::stream::{self, StreamExt};

use super::{AdapterChunk, AdapterError, AdapterRequest, AdapterStream, ServiceAdapter};

/// Adapter that produces no content
///
/// Used when a runtime only routes to agents but the transport still
/// expects a service adapter to be configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyAdapter;

#[async_trait::async_trait]
impl ServiceAdapter for EmptyAdapter {
    fn name(&self) -> &str {
        "empty"
    }

    async fn process(&self, _request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        Ok(stream::iter(vec![Ok(AdapterChunk::Finish { reason: None })]).boxed())
    }
}
