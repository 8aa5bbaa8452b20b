//! Eager state updates derived from streamed tool arguments
//!
//! An agent can declare that a state key mirrors a tool argument. While the
//! tool call streams, the tracker buffers its argument text and produces a
//! state patch only once the buffer parses as complete JSON. Partial JSON is
//! never turned into a patch.

use std::collections::HashMap;

use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maps a state key to a tool (and optionally one of its arguments)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictStateConfig {
    pub state_key: String,
    #[serde(alias = "tool_name")]
    pub tool: String,
    #[serde(default)]
    pub tool_argument: Option<String>,
}

impl PredictStateConfig {
    /// Parse either a list of configs or a `{state_key: {tool_name, tool_argument}}` map
    pub fn parse_all(value: &Value) -> Vec<PredictStateConfig> {
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            Value::Object(map) => map
                .iter()
                .filter_map(|(key, entry)| {
                    let tool = entry
                        .get("tool_name")
                        .or_else(|| entry.get("tool"))?
                        .as_str()?;
                    Some(PredictStateConfig {
                        state_key: key.clone(),
                        tool: tool.to_string(),
                        tool_argument: entry
                            .get("tool_argument")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Buffered {
    tool: String,
    args: String,
    last_emitted: Option<Value>,
}

/// Buffers watched tool calls and yields patches for complete arguments
#[derive(Debug, Default)]
pub struct PredictStateTracker {
    configs: Vec<PredictStateConfig>,
    calls: HashMap<String, Buffered>,
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

impl PredictStateTracker {
    pub fn new(configs: Vec<PredictStateConfig>) -> Self {
        Self {
            configs,
            calls: HashMap::new(),
        }
    }

    /// Replace the active configuration
    pub fn configure(&mut self, configs: Vec<PredictStateConfig>) {
        self.configs = configs;
    }

    pub fn is_configured(&self) -> bool {
        !self.configs.is_empty()
    }

    /// Forget configuration and buffers, e.g. when a graph node finishes
    pub fn reset(&mut self) {
        self.configs.clear();
        self.calls.clear();
    }

    fn watches(&self, tool: &str) -> bool {
        self.configs.iter().any(|c| c.tool == tool)
    }

    pub fn on_start(&mut self, tool_call_id: &str, tool: &str) {
        if self.watches(tool) {
            self.calls.insert(
                tool_call_id.to_string(),
                Buffered {
                    tool: tool.to_string(),
                    args: String::new(),
                    last_emitted: None,
                },
            );
        }
    }

    /// Buffer an argument chunk; returns a patch if the buffer is now complete JSON
    pub fn on_args(&mut self, tool_call_id: &str, delta: &str) -> Option<Patch> {
        let buffered = self.calls.get_mut(tool_call_id)?;
        buffered.args.push_str(delta);
        self.try_patch(tool_call_id)
    }

    /// The call finished; returns a patch for the final arguments, if they parse
    pub fn on_end(&mut self, tool_call_id: &str) -> Option<Patch> {
        let patch = self.try_patch(tool_call_id);
        if let Some(buffered) = self.calls.remove(tool_call_id) {
            if serde_json::from_str::<Value>(&buffered.args).is_err() {
                log::warn!(
                    "tool call {tool_call_id} ({}) ended with unparsable arguments; no state predicted",
                    buffered.tool
                );
            }
        }
        patch
    }

    fn try_patch(&mut self, tool_call_id: &str) -> Option<Patch> {
        let buffered = self.calls.get_mut(tool_call_id)?;
        let parsed: Value = serde_json::from_str(&buffered.args).ok()?;
        if buffered.last_emitted.as_ref() == Some(&parsed) {
            return None;
        }

        let mut ops = Vec::new();
        for config in self.configs.iter().filter(|c| c.tool == buffered.tool) {
            let value = match &config.tool_argument {
                Some(arg) => match parsed.get(arg) {
                    Some(v) => v.clone(),
                    None => continue,
                },
                None => parsed.clone(),
            };
            ops.push(json!({
                "op": "add",
                "path": format!("/{}", escape_pointer(&config.state_key)),
                "value": value,
            }));
        }
        buffered.last_emitted = Some(parsed);
        if ops.is_empty() {
            return None;
        }
        serde_json::from_value(Value::Array(ops)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PredictStateTracker {
        PredictStateTracker::new(PredictStateConfig::parse_all(&json!([
            {"state_key": "steps", "tool": "plan", "tool_argument": "steps"}
        ])))
    }

    fn as_json(patch: Patch) -> Value {
        serde_json::to_value(patch).unwrap()
    }

    #[test]
    fn test_partial_arguments_never_produce_patches() {
        let mut t = tracker();
        t.on_start("c1", "plan");
        assert!(t.on_args("c1", "{\"steps\": [\"a\"").is_none());
        assert!(t.on_args("c1", ", \"b\"").is_none());

        let patch = t.on_args("c1", "]}").unwrap();
        assert_eq!(
            as_json(patch),
            json!([{"op": "add", "path": "/steps", "value": ["a", "b"]}])
        );
        // already emitted for this exact value
        assert!(t.on_end("c1").is_none());
    }

    #[test]
    fn test_unwatched_tools_are_ignored() {
        let mut t = tracker();
        t.on_start("c1", "search");
        assert!(t.on_args("c1", "{\"steps\": 1}").is_none());
        assert!(t.on_end("c1").is_none());
    }

    #[test]
    fn test_truncated_arguments_yield_nothing_at_end() {
        let mut t = tracker();
        t.on_start("c1", "plan");
        t.on_args("c1", "{\"steps\": [");
        assert!(t.on_end("c1").is_none());
    }

    #[test]
    fn test_whole_arguments_and_map_config() {
        let mut t = PredictStateTracker::new(PredictStateConfig::parse_all(&json!({
            "draft/doc": {"tool_name": "write"}
        })));
        t.on_start("c1", "write");
        let patch = t.on_args("c1", "{\"text\":\"hi\"}").unwrap();
        assert_eq!(
            as_json(patch),
            json!([{"op": "add", "path": "/draft~1doc", "value": {"text": "hi"}}])
        );
    }

    #[test]
    fn test_reset_clears_configuration() {
        let mut t = tracker();
        t.reset();
        assert!(!t.is_configured());
        t.on_start("c1", "plan");
        assert!(t.on_args("c1", "{\"steps\":[]}").is_none());
    }
}
