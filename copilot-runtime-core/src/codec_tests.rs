use super::*;
use futures::stream;
use serde_json::json;

fn sample_events() -> Vec<CanonicalEvent> {
    let patch: Patch =
        serde_json::from_value(json!([{"op": "add", "path": "/steps", "value": [1, 2]}])).unwrap();
    vec![
        CanonicalEvent::ControlData {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            message_id: "m1".into(),
        },
        CanonicalEvent::TextDelta {
            run_id: "r1".into(),
            message_id: "m1".into(),
            delta: "line one\nline two".into(),
        },
        CanonicalEvent::ToolCallStart {
            run_id: "r1".into(),
            tool_call_id: "c1".into(),
            name: "search".into(),
            parent_message_id: Some("m1".into()),
        },
        CanonicalEvent::ToolCallArgsDelta {
            run_id: "r1".into(),
            tool_call_id: "c1".into(),
            delta: "{\"q\":".into(),
        },
        CanonicalEvent::ToolCallEnd {
            run_id: "r1".into(),
            tool_call_id: "c1".into(),
        },
        CanonicalEvent::ToolCallResult {
            run_id: "r1".into(),
            message_id: "tr1".into(),
            tool_call_id: "c1".into(),
            content: "found".into(),
        },
        CanonicalEvent::StateDelta {
            run_id: "r1".into(),
            agent_name: "planner".into(),
            patch,
        },
        CanonicalEvent::Interrupt {
            run_id: "r1".into(),
            payload: json!({"question": "approve?"}),
        },
        CanonicalEvent::AssistantMessage {
            run_id: "r1".into(),
            message: Message::Assistant {
                id: "m1".into(),
                content: Some("hi".into()),
                tool_calls: vec![],
                generative_ui: None,
            },
        },
        CanonicalEvent::Error {
            run_id: "r1".into(),
            message: "upstream closed".into(),
        },
        CanonicalEvent::RunFinished {
            run_id: "r1".into(),
            outcome: RunOutcome::Cancelled,
        },
    ]
}

#[test]
fn test_encode_decode_inverse() {
    for event in sample_events() {
        let line = encode(&event).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1, "embedded newline in {line}");
        assert_eq!(decode_line(line.trim_end_matches('\n')), Frame::Event(event));
    }
}

#[test]
fn test_control_data_wire_shape() {
    let line = encode(&CanonicalEvent::ControlData {
        thread_id: "t1".into(),
        run_id: "r1".into(),
        message_id: "m1".into(),
    })
    .unwrap();
    let (prefix, payload) = line.trim_end().split_once(':').unwrap();
    assert_eq!(prefix, "5");
    let value: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(value, json!({"threadId": "t1", "runId": "r1", "messageId": "m1"}));
}

#[test]
fn test_bare_string_error_payload() {
    let frame = decode_line(r#"3:"provider unavailable""#);
    assert_eq!(
        frame,
        Frame::Event(CanonicalEvent::Error {
            run_id: String::new(),
            message: "provider unavailable".into(),
        })
    );

    let frame = decode_line(r#"3:{"message":"bad key"}"#);
    assert!(matches!(
        frame,
        Frame::Event(CanonicalEvent::Error { ref message, .. }) if message == "bad key"
    ));
}

#[test]
fn test_malformed_payload_yields_raw() {
    assert_eq!(
        decode_line("0:{not json"),
        Frame::Malformed {
            prefix: "0".into(),
            raw: "{not json".into(),
        }
    );
    // valid JSON, wrong shape
    assert!(matches!(decode_line("5:[1,2]"), Frame::Malformed { .. }));
    assert!(matches!(decode_line("no separator"), Frame::Malformed { ref prefix, .. } if prefix.is_empty()));
}

#[test]
fn test_unknown_prefix_passes_through() {
    assert_eq!(
        decode_line(r#"9:{"custom":true}"#),
        Frame::Unknown {
            prefix: "9".into(),
            payload: json!({"custom": true}),
        }
    );
    assert!(matches!(
        decode_event(r#"9:{"custom":true}"#),
        Err(CodecError::UnknownPrefix(p)) if p == "9"
    ));
}

#[test]
fn test_payload_may_contain_colons() {
    let frame = decode_line(r#"3:{"runId":"r1","message":"a:b:c"}"#);
    assert!(matches!(
        frame,
        Frame::Event(CanonicalEvent::Error { ref message, .. }) if message == "a:b:c"
    ));
}

#[test]
fn test_decoder_reassembles_split_reads() {
    let first = encode(&sample_events()[0]).unwrap();
    let second = encode(&sample_events()[1]).unwrap();
    let joined = format!("{first}{second}");
    let (a, b) = joined.as_bytes().split_at(first.len() - 3);

    let mut decoder = FrameDecoder::new();
    assert!(decoder.push(a).is_empty());
    let frames = decoder.push(b);
    assert_eq!(frames.len(), 2);
    assert!(decoder.finish().is_none());
}

#[test]
fn test_decoder_keeps_multibyte_chars_across_reads() {
    let line = encode(&CanonicalEvent::TextDelta {
        run_id: "r".into(),
        message_id: "m".into(),
        delta: "héllo".into(),
    })
    .unwrap();
    let bytes = line.as_bytes();
    let split = line.find('é').unwrap() + 1;

    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.push(&bytes[..split]);
    frames.extend(decoder.push(&bytes[split..]));
    assert!(matches!(
        &frames[..],
        [Frame::Event(CanonicalEvent::TextDelta { delta, .. })] if delta == "héllo"
    ));
}

#[test]
fn test_decoder_flushes_trailing_partial_frame() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder
        .push(br#"3:{"runId":"r1","message":"cut"}"#)
        .is_empty());
    assert!(matches!(
        decoder.finish(),
        Some(Frame::Event(CanonicalEvent::Error { .. }))
    ));

    decoder.push(b"0:{\"runId\":");
    assert!(matches!(decoder.finish(), Some(Frame::Malformed { .. })));
}

#[tokio::test]
async fn test_decode_stream_survives_corrupt_frame() {
    let body = format!(
        "{}0:{{corrupt\n{}",
        encode(&sample_events()[0]).unwrap(),
        encode(&sample_events()[1]).unwrap()
    );
    let chunks: Vec<Result<Bytes, std::io::Error>> = body
        .as_bytes()
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let frames: Vec<Frame> = decode_stream(stream::iter(chunks))
        .map(|f| f.unwrap())
        .collect()
        .await;

    assert_eq!(frames.len(), 3);
    assert!(matches!(frames[0], Frame::Event(CanonicalEvent::ControlData { .. })));
    assert!(matches!(frames[1], Frame::Malformed { .. }));
    assert!(matches!(frames[2], Frame::Event(CanonicalEvent::TextDelta { .. })));
}

#[tokio::test]
async fn test_lines_stops_after_transport_error() {
    let chunks: Vec<Result<Bytes, &'static str>> = vec![
        Ok(Bytes::from_static(b"a\nb")),
        Err("reset"),
        Ok(Bytes::from_static(b"c\n")),
    ];
    let out: Vec<Result<String, &str>> = lines(stream::iter(chunks)).collect().await;
    assert_eq!(out, vec![Ok("a".to_string()), Err("reset")]);
}
