use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{AdapterError, AdapterRequest, AdapterStream, ServiceAdapter};

type Callback =
    dyn Fn(AdapterRequest) -> BoxFuture<'static, Result<AdapterStream, AdapterError>> + Send + Sync;

/// Adapter backed by an arbitrary async callback producing adapter chunks
#[derive(Clone)]
pub struct CustomAdapter {
    name: String,
    callback: Arc<Callback>,
}

impl CustomAdapter {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(AdapterRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AdapterStream, AdapterError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(move |request| Box::pin(callback(request))),
        }
    }
}

impl std::fmt::Debug for CustomAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomAdapter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for CustomAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, request: AdapterRequest) -> Result<AdapterStream, AdapterError> {
        (self.callback)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterChunk;
    use futures::{stream, StreamExt};

    #[tokio::test]
    async fn test_custom_adapter_echoes_last_message() {
        let adapter = CustomAdapter::new("echo", |request: AdapterRequest| async move {
            let text = request
                .messages
                .last()
                .and_then(|m| m.text())
                .unwrap_or_default()
                .to_string();
            let chunks = vec![
                Ok(AdapterChunk::TextDelta(text)),
                Ok(AdapterChunk::Finish { reason: Some("stop".into()) }),
            ];
            Ok(stream::iter(chunks).boxed())
        });

        assert_eq!(adapter.name(), "echo");
        let out: Vec<_> = adapter
            .process(AdapterRequest::new(vec![crate::types::Message::user("ping")]))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(&out[0], Ok(AdapterChunk::TextDelta(t)) if t == "ping"));
    }
}
