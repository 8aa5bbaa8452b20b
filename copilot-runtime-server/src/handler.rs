//! HTTP handlers for the runtime endpoint.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use copilot_runtime_core::{codec, RuntimeInfo, RuntimeRequest};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Marks a response body as line-framed stream data
pub const STREAM_DATA_HEADER: &str = "x-experimental-stream-data";

/// Body of an info request; an empty body means no properties.
#[derive(Debug, Default, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    pub properties: Value,
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned + Default>(body: &[u8]) -> ServerResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

/// Start a run and stream its frames.
///
/// Setup errors are answered with a JSON error body. After that the response
/// is always 200 and failures arrive as error frames. Dropping the response
/// body cancels the run.
pub async fn stream_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let request: RuntimeRequest = parse_json(&body)?;

    let cancel = CancellationToken::new();
    let run = state.runtime.process(request, cancel.clone()).await?;
    log::debug!("streaming run {} on thread {}", run.run_id, run.thread_id);

    let guard = cancel.drop_guard();
    let frames = run.into_stream().map(move |event| {
        let _guard = &guard;
        codec::encode(&event).map(Bytes::from)
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static(STREAM_DATA_HEADER), "true"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

/// List the agents and actions the runtime serves.
pub async fn info_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ServerResult<Json<RuntimeInfo>> {
    let request: InfoRequest = parse_json(&body)?;
    let properties = match request.properties {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    Ok(Json(state.runtime.info(&properties).await))
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
