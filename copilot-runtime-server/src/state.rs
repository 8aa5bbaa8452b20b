//! Application state for the runtime server.

use copilot_runtime_core::CopilotRuntime;

/// Shared by every handler; the runtime itself is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub runtime: CopilotRuntime,
}

impl AppState {
    pub fn new(runtime: CopilotRuntime) -> Self {
        Self { runtime }
    }
}
