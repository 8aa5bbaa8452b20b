//! Tests for request body parsing.

use super::*;
use serde_json::json;

#[test]
fn test_empty_body_uses_defaults() {
    let request: InfoRequest = parse_json(b"").unwrap();
    assert!(request.properties.is_null());

    let request: InfoRequest = parse_json(b"  \n").unwrap();
    assert!(request.properties.is_null());
}

#[test]
fn test_info_properties_are_read() {
    let request: InfoRequest = parse_json(br#"{"properties": {"tenant": "acme"}}"#).unwrap();
    assert_eq!(request.properties, json!({"tenant": "acme"}));
}

#[test]
fn test_runtime_request_from_body() {
    let request: RuntimeRequest = parse_json(
        br#"{
            "threadId": "t1",
            "agent": "calc",
            "messages": [{"role": "user", "content": "2+2?"}],
            "tools": [{"name": "confirm", "description": "Ask the user", "available": "remote"}]
        }"#,
    )
    .unwrap();

    assert_eq!(request.thread_id.as_deref(), Some("t1"));
    assert_eq!(request.agent_name.as_deref(), Some("calc"));
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.actions[0].name, "confirm");
    assert!(!request.actions[0].is_local());
}

#[test]
fn test_malformed_body_is_invalid_request() {
    let err = parse_json::<RuntimeRequest>(b"{\"messages\": [").unwrap_err();
    assert!(matches!(err, ServerError::InvalidRequest(_)));

    let err = parse_json::<RuntimeRequest>(br#"{"messages": "hello"}"#).unwrap_err();
    assert!(matches!(err, ServerError::InvalidRequest(_)));
}
