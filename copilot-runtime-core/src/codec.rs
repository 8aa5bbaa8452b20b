//! Line-oriented stream framing
//!
//! Every [`CanonicalEvent`] travels as one line `<prefix>:<json>\n`. The
//! prefix is a single digit naming the frame kind:
//!
//! | prefix | kind                | events                                   |
//! |--------|---------------------|------------------------------------------|
//! | `0`    | text                | `TextDelta`                              |
//! | `1`    | tool call           | `ToolCallStart/ArgsDelta/End/Result`     |
//! | `2`    | data                | `StateDelta`, `Interrupt`, `RunFinished` |
//! | `3`    | error               | `Error`                                  |
//! | `4`    | assistant message   | `AssistantMessage`                       |
//! | `5`    | control data        | `ControlData`                            |
//!
//! Decoding is tolerant. A payload that is not valid JSON, or valid JSON of
//! the wrong shape, yields [`Frame::Malformed`] with the raw text, and an
//! unrecognized prefix yields [`Frame::Unknown`]. Neither stops later lines
//! from decoding.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{CanonicalEvent, RunOutcome};
use crate::types::Message;

/// Frame kinds of the wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePrefix {
    Text,
    ToolCall,
    Data,
    Error,
    AssistantMessage,
    ControlData,
}

impl FramePrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "0",
            Self::ToolCall => "1",
            Self::Data => "2",
            Self::Error => "3",
            Self::AssistantMessage => "4",
            Self::ControlData => "5",
        }
    }

    pub fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "0" => Some(Self::Text),
            "1" => Some(Self::ToolCall),
            "2" => Some(Self::Data),
            "3" => Some(Self::Error),
            "4" => Some(Self::AssistantMessage),
            "5" => Some(Self::ControlData),
            _ => None,
        }
    }

    pub fn for_event(event: &CanonicalEvent) -> Self {
        match event {
            CanonicalEvent::TextDelta { .. } => Self::Text,
            CanonicalEvent::ToolCallStart { .. }
            | CanonicalEvent::ToolCallArgsDelta { .. }
            | CanonicalEvent::ToolCallEnd { .. }
            | CanonicalEvent::ToolCallResult { .. } => Self::ToolCall,
            CanonicalEvent::StateDelta { .. }
            | CanonicalEvent::Interrupt { .. }
            | CanonicalEvent::RunFinished { .. } => Self::Data,
            CanonicalEvent::Error { .. } => Self::Error,
            CanonicalEvent::AssistantMessage { .. } => Self::AssistantMessage,
            CanonicalEvent::ControlData { .. } => Self::ControlData,
        }
    }
}

/// One decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(CanonicalEvent),
    /// Known prefix whose payload could not be decoded
    Malformed { prefix: String, raw: String },
    /// Prefix outside the closed set, passed through untouched
    Unknown { prefix: String, payload: Value },
}

impl Frame {
    pub fn into_event(self) -> Option<CanonicalEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Strict decoding failure, see [`decode_event`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("line has no prefix separator: {0}")]
    MissingSeparator(String),

    #[error("unknown frame prefix '{0}'")]
    UnknownPrefix(String),

    #[error("malformed '{prefix}' frame: {raw}")]
    Malformed { prefix: String, raw: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextFrame {
    run_id: String,
    message_id: String,
    delta: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolCallFrame {
    #[serde(rename_all = "camelCase")]
    Start {
        run_id: String,
        tool_call_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Args {
        run_id: String,
        tool_call_id: String,
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    End { run_id: String, tool_call_id: String },
    #[serde(rename_all = "camelCase")]
    Result {
        run_id: String,
        message_id: String,
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DataFrame {
    #[serde(rename_all = "camelCase")]
    StateDelta {
        run_id: String,
        agent_name: String,
        patch: Patch,
    },
    #[serde(rename_all = "camelCase")]
    Interrupt { run_id: String, payload: Value },
    #[serde(rename_all = "camelCase")]
    RunFinished { run_id: String, outcome: RunOutcome },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ErrorFrame {
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(default)]
        run_id: String,
        message: String,
    },
    Bare(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssistantMessageFrame {
    run_id: String,
    message: Message,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlDataFrame {
    thread_id: String,
    run_id: String,
    message_id: String,
}

fn payload(event: &CanonicalEvent) -> Result<String, serde_json::Error> {
    match event.clone() {
        CanonicalEvent::TextDelta {
            run_id,
            message_id,
            delta,
        } => serde_json::to_string(&TextFrame {
            run_id,
            message_id,
            delta,
        }),
        CanonicalEvent::ToolCallStart {
            run_id,
            tool_call_id,
            name,
            parent_message_id,
        } => serde_json::to_string(&ToolCallFrame::Start {
            run_id,
            tool_call_id,
            name,
            parent_message_id,
        }),
        CanonicalEvent::ToolCallArgsDelta {
            run_id,
            tool_call_id,
            delta,
        } => serde_json::to_string(&ToolCallFrame::Args {
            run_id,
            tool_call_id,
            delta,
        }),
        CanonicalEvent::ToolCallEnd {
            run_id,
            tool_call_id,
        } => serde_json::to_string(&ToolCallFrame::End {
            run_id,
            tool_call_id,
        }),
        CanonicalEvent::ToolCallResult {
            run_id,
            message_id,
            tool_call_id,
            content,
        } => serde_json::to_string(&ToolCallFrame::Result {
            run_id,
            message_id,
            tool_call_id,
            content,
        }),
        CanonicalEvent::StateDelta {
            run_id,
            agent_name,
            patch,
        } => serde_json::to_string(&DataFrame::StateDelta {
            run_id,
            agent_name,
            patch,
        }),
        CanonicalEvent::Interrupt { run_id, payload } => {
            serde_json::to_string(&DataFrame::Interrupt { run_id, payload })
        }
        CanonicalEvent::RunFinished { run_id, outcome } => {
            serde_json::to_string(&DataFrame::RunFinished { run_id, outcome })
        }
        CanonicalEvent::Error { run_id, message } => {
            serde_json::to_string(&ErrorFrame::Full { run_id, message })
        }
        CanonicalEvent::AssistantMessage { run_id, message } => {
            serde_json::to_string(&AssistantMessageFrame { run_id, message })
        }
        CanonicalEvent::ControlData {
            thread_id,
            run_id,
            message_id,
        } => serde_json::to_string(&ControlDataFrame {
            thread_id,
            run_id,
            message_id,
        }),
    }
}

/// Encode an event as one newline-terminated frame
///
/// The JSON serializer escapes control characters, so the payload never
/// contains a raw newline.
pub fn encode(event: &CanonicalEvent) -> Result<String, serde_json::Error> {
    let prefix = FramePrefix::for_event(event);
    Ok(format!("{}:{}\n", prefix.as_str(), payload(event)?))
}

fn decode_known(prefix: FramePrefix, json: &str) -> Result<CanonicalEvent, serde_json::Error> {
    let event = match prefix {
        FramePrefix::Text => {
            let f: TextFrame = serde_json::from_str(json)?;
            CanonicalEvent::TextDelta {
                run_id: f.run_id,
                message_id: f.message_id,
                delta: f.delta,
            }
        }
        FramePrefix::ToolCall => match serde_json::from_str::<ToolCallFrame>(json)? {
            ToolCallFrame::Start {
                run_id,
                tool_call_id,
                name,
                parent_message_id,
            } => CanonicalEvent::ToolCallStart {
                run_id,
                tool_call_id,
                name,
                parent_message_id,
            },
            ToolCallFrame::Args {
                run_id,
                tool_call_id,
                delta,
            } => CanonicalEvent::ToolCallArgsDelta {
                run_id,
                tool_call_id,
                delta,
            },
            ToolCallFrame::End {
                run_id,
                tool_call_id,
            } => CanonicalEvent::ToolCallEnd {
                run_id,
                tool_call_id,
            },
            ToolCallFrame::Result {
                run_id,
                message_id,
                tool_call_id,
                content,
            } => CanonicalEvent::ToolCallResult {
                run_id,
                message_id,
                tool_call_id,
                content,
            },
        },
        FramePrefix::Data => match serde_json::from_str::<DataFrame>(json)? {
            DataFrame::StateDelta {
                run_id,
                agent_name,
                patch,
            } => CanonicalEvent::StateDelta {
                run_id,
                agent_name,
                patch,
            },
            DataFrame::Interrupt { run_id, payload } => {
                CanonicalEvent::Interrupt { run_id, payload }
            }
            DataFrame::RunFinished { run_id, outcome } => {
                CanonicalEvent::RunFinished { run_id, outcome }
            }
        },
        FramePrefix::Error => match serde_json::from_str::<ErrorFrame>(json)? {
            ErrorFrame::Full { run_id, message } => CanonicalEvent::Error { run_id, message },
            ErrorFrame::Bare(message) => CanonicalEvent::Error {
                run_id: String::new(),
                message,
            },
        },
        FramePrefix::AssistantMessage => {
            let f: AssistantMessageFrame = serde_json::from_str(json)?;
            CanonicalEvent::AssistantMessage {
                run_id: f.run_id,
                message: f.message,
            }
        }
        FramePrefix::ControlData => {
            let f: ControlDataFrame = serde_json::from_str(json)?;
            CanonicalEvent::ControlData {
                thread_id: f.thread_id,
                run_id: f.run_id,
                message_id: f.message_id,
            }
        }
    };
    Ok(event)
}

/// Decode a single line (without its trailing newline)
///
/// Never fails: problems are reported as [`Frame::Malformed`] or
/// [`Frame::Unknown`] so the caller can decide how loud to be.
pub fn decode_line(line: &str) -> Frame {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some((prefix, json)) = line.split_once(':') else {
        return Frame::Malformed {
            prefix: String::new(),
            raw: line.to_string(),
        };
    };

    match FramePrefix::parse(prefix) {
        Some(kind) => match decode_known(kind, json) {
            Ok(event) => Frame::Event(event),
            Err(_) => Frame::Malformed {
                prefix: prefix.to_string(),
                raw: json.to_string(),
            },
        },
        None => match serde_json::from_str::<Value>(json) {
            Ok(payload) => Frame::Unknown {
                prefix: prefix.to_string(),
                payload,
            },
            Err(_) => Frame::Malformed {
                prefix: prefix.to_string(),
                raw: json.to_string(),
            },
        },
    }
}

/// Strict variant of [`decode_line`] for callers that want an error
pub fn decode_event(line: &str) -> Result<CanonicalEvent, CodecError> {
    match decode_line(line) {
        Frame::Event(event) => Ok(event),
        Frame::Unknown { prefix, .. } => Err(CodecError::UnknownPrefix(prefix)),
        Frame::Malformed { prefix, raw } if prefix.is_empty() => {
            Err(CodecError::MissingSeparator(raw))
        }
        Frame::Malformed { prefix, raw } => Err(CodecError::Malformed { prefix, raw }),
    }
}

/// Reassembles newline-delimited lines from arbitrarily split reads
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// across reads is never cut in half.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        lines
    }

    /// Flush a trailing unterminated line at end of input
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Incremental frame decoder over a [`LineBuffer`]
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.lines
            .push(chunk)
            .iter()
            .map(|line| decode_line(line))
            .collect()
    }

    /// Decode whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Frame> {
        self.lines.finish().map(|line| decode_line(&line))
    }
}

/// Split a byte stream into lines, flushing the remainder at end of stream
pub fn lines<S, E>(stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Send,
{
    async_stream::stream! {
        let mut buffer = LineBuffer::new();
        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in buffer.push(&chunk) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(line) = buffer.finish() {
            yield Ok(line);
        }
    }
}

/// Decode a byte stream into frames
pub fn decode_stream<S, E>(stream: S) -> impl Stream<Item = Result<Frame, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Send,
{
    lines(stream).map(|line| line.map(|line| decode_line(&line)))
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
