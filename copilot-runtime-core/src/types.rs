use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a fresh identifier for messages, runs and tool calls
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A unit of conversation content
///
/// Messages are tagged by `role` on the wire. Ids are optional in inbound
/// JSON; a fresh id is generated when one is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        #[serde(default = "new_id")]
        id: String,
        content: String,
    },
    Developer {
        #[serde(default = "new_id")]
        id: String,
        content: String,
    },
    User {
        #[serde(default = "new_id")]
        id: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Assistant {
        #[serde(default = "new_id")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        /// Generative UI payload rendered by the client
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generative_ui: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        #[serde(default = "new_id")]
        id: String,
        tool_call_id: String,
        #[serde(default)]
        name: String,
        content: String,
    },
    /// Out-of-band status such as intermediate agent state
    #[serde(rename_all = "camelCase")]
    Activity {
        #[serde(default = "new_id")]
        id: String,
        activity_type: String,
        content: Value,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            id: new_id(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            id: new_id(),
            content: content.into(),
        }
    }

    /// Assistant message with text only
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            id: new_id(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            generative_ui: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            id: new_id(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::System { id, .. }
            | Self::Developer { id, .. }
            | Self::User { id, .. }
            | Self::Assistant { id, .. }
            | Self::Tool { id, .. }
            | Self::Activity { id, .. } => id,
        }
    }

    /// Role name as it appears on the wire
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Developer { .. } => "developer",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
            Self::Activity { .. } => "activity",
        }
    }

    /// Text content, if this message kind carries any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content, .. }
            | Self::Developer { content, .. }
            | Self::User { content, .. }
            | Self::Tool { content, .. } => Some(content),
            Self::Assistant { content, .. } => content.as_deref(),
            Self::Activity { .. } => None,
        }
    }

    /// Tool calls carried by an assistant message
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A request from the model to invoke a tool
///
/// `arguments` holds the raw JSON text as streamed. It is only guaranteed to
/// parse once the call has been marked complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    /// Parse the accumulated arguments. An empty argument string is `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Errors raised when a thread's append-only ordering would be violated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    #[error("tool result references unknown tool call '{0}'")]
    UnknownToolCall(String),

    #[error("duplicate tool result for tool call '{0}'")]
    DuplicateToolResult(String),
}

/// An ordered, append-only conversation history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thread {
    id: String,
    messages: Vec<Message>,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }

    /// Build a thread from existing history, validating causal order
    pub fn from_messages(
        id: impl Into<String>,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<Self, ThreadError> {
        let mut thread = Self::new(id);
        for message in messages {
            thread.append(message)?;
        }
        Ok(thread)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message
    ///
    /// A tool result must reference a tool call emitted earlier in this
    /// thread, and each tool call may be answered at most once.
    pub fn append(&mut self, message: Message) -> Result<(), ThreadError> {
        if let Message::Tool { tool_call_id, .. } = &message {
            let known = self
                .messages
                .iter()
                .flat_map(|m| m.tool_calls())
                .any(|call| &call.id == tool_call_id);
            if !known {
                return Err(ThreadError::UnknownToolCall(tool_call_id.clone()));
            }
            let answered = self.messages.iter().any(|m| {
                matches!(m, Message::Tool { tool_call_id: existing, .. } if existing == tool_call_id)
            });
            if answered {
                return Err(ThreadError::DuplicateToolResult(tool_call_id.clone()));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Where an action is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionAvailability {
    /// Executed by the runtime through a registered handler
    Local,
    /// Only advertised; executed by the client or the agent itself
    #[default]
    Remote,
}

/// Name, description and parameter schema of an action or tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the parameters object
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    #[serde(default, rename = "available")]
    pub availability: ActionAvailability,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_object_schema(),
            availability: ActionAvailability::Remote,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn local(mut self) -> Self {
        self.availability = ActionAvailability::Local;
        self
    }

    pub fn is_local(&self) -> bool {
        self.availability == ActionAvailability::Local
    }
}
