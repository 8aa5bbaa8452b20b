//! Integration tests for copilot-runtime-server.
//!
//! These tests drive the full request -> runtime -> frames -> response flow.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use copilot_runtime_core::codec::{self, Frame};
use copilot_runtime_core::test_utils::{EventCollector, MockAdapter, ScriptStep, ScriptedAgent};
use copilot_runtime_core::{CanonicalEvent, CopilotRuntime, RunOutcome};
use copilot_runtime_server::{RuntimeRouter, STREAM_DATA_HEADER};
use serde_json::{json, Value};
use tower::ServiceExt;

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn app(runtime: CopilotRuntime) -> axum::Router {
    RuntimeRouter::new(runtime)
        .with_endpoint("/api/copilotkit")
        .build()
        .unwrap()
}

/// Decode every frame of a fully buffered response body.
async fn collect_frames(body: Body) -> Vec<Frame> {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.lines().map(codec::decode_line).collect()
}

async fn body_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Streaming Endpoint
// ============================================================================

#[tokio::test]
async fn test_run_streams_line_framed_events() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new().with_text("4"))
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post(
            "/api/copilotkit",
            json!({
                "threadId": "t1",
                "agentName": "calc",
                "messages": [{"role": "user", "content": "2+2?"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()[STREAM_DATA_HEADER], "true");

    let events: Vec<CanonicalEvent> = collect_frames(response.into_body())
        .await
        .into_iter()
        .filter_map(Frame::into_event)
        .collect();

    assert!(matches!(
        &events[0],
        CanonicalEvent::ControlData { thread_id, .. } if thread_id == "t1"
    ));
    assert!(matches!(&events[1], CanonicalEvent::TextDelta { delta, .. } if delta == "4"));
    assert!(matches!(
        events.last(),
        Some(CanonicalEvent::RunFinished { outcome: RunOutcome::Completed, .. })
    ));
}

#[tokio::test]
async fn test_failure_after_start_is_reported_in_band() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new().with_error("provider down"))
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post(
            "/api/copilotkit",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frames = collect_frames(response.into_body()).await;
    let errors: Vec<&Frame> = frames
        .iter()
        .filter(|f| matches!(f, Frame::Event(CanonicalEvent::Error { .. })))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        frames.last(),
        Some(Frame::Event(CanonicalEvent::RunFinished { outcome: RunOutcome::Errored, .. }))
    ));
}

// ============================================================================
// Setup Errors
// ============================================================================

#[tokio::test]
async fn test_unknown_agent_is_rejected_before_streaming() {
    let runtime = CopilotRuntime::builder()
        .agent(ScriptedAgent::new("planner"))
        .agent(ScriptedAgent::new("writer"))
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post(
            "/api/copilotkit",
            json!({"agentName": "ghost", "messages": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["code"], 404);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_unknown_resume_run_is_rejected() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new())
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post(
            "/api/copilotkit",
            json!({"messages": [], "resume": {"runId": "never-ran", "resolution": true}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_local_action_without_handler_is_bad_request() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new())
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post(
            "/api/copilotkit",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "actions": [{"name": "lookup", "available": "local"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("lookup"));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new())
        .build()
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/copilotkit")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(runtime).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["code"], 400);
}

// ============================================================================
// Info Endpoint
// ============================================================================

#[tokio::test]
async fn test_info_lists_registered_agents() {
    let runtime = CopilotRuntime::builder()
        .agent(ScriptedAgent::new("planner"))
        .build()
        .unwrap();

    let response = app(runtime)
        .oneshot(post("/api/copilotkit/info", json!({"properties": {}})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["agents"][0]["name"], "planner");
    assert_eq!(body["actions"], json!([]));
}

#[tokio::test]
async fn test_cors_preflight_is_answered() {
    let runtime = CopilotRuntime::builder()
        .service_adapter(MockAdapter::new())
        .build()
        .unwrap();

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/copilotkit")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app(runtime).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("access-control-allow-origin"));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_dropping_response_cancels_run() {
    let agent = ScriptedAgent::new("slow").with_script([ScriptStep::Hang]);
    let runtime = CopilotRuntime::builder().agent(agent).build().unwrap();
    let collector = EventCollector::new();
    runtime.add_hook(collector.clone());

    let response = app(runtime.clone())
        .oneshot(post(
            "/api/copilotkit",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(runtime.tracker().len(), 1);

    drop(response);

    let cancelled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let done = collector.events().iter().any(|e| {
                matches!(
                    e,
                    CanonicalEvent::RunFinished { outcome: RunOutcome::Cancelled, .. }
                )
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(cancelled.is_ok(), "run was not cancelled after disconnect");
    assert!(!collector.has_event("error"));
    assert!(runtime.tracker().is_empty());
}
