//! Basic Copilot Runtime server backed by an OpenAI-compatible provider.
//!
//! Run with:
//! ```sh
//! OPENAI_API_KEY=... cargo run -p copilot-runtime-server --example basic_server
//! ```
//!
//! Test with curl:
//! ```sh
//! curl -X POST http://localhost:3000/api/copilotkit \
//!   -H "Content-Type: application/json" \
//!   -d '{"messages": [{"role": "user", "content": "Hello!"}]}' \
//!   -N
//! ```

use copilot_runtime_core::action::{ActionResult, FnAction};
use copilot_runtime_core::adapter::OpenAiAdapter;
use copilot_runtime_core::CopilotRuntime;
use copilot_runtime_server::RuntimeRouter;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = FnAction::new("currentTime", "Seconds since the Unix epoch", |_: Value| async move {
        Ok(ActionResult::text(unix_time()))
    })
    .with_parameters(json!({ "type": "object", "properties": {} }))
    .boxed();

    let runtime = CopilotRuntime::builder()
        .service_adapter(OpenAiAdapter::from_env()?)
        .action(time)
        .build()?;

    let app = RuntimeRouter::new(runtime)
        .with_endpoint("/api/copilotkit")
        .build()?;

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    println!("Server running at http://localhost:3000");
    println!("Runtime endpoint: POST http://localhost:3000/api/copilotkit");
    println!("Info endpoint:    POST http://localhost:3000/api/copilotkit/info");

    axum::serve(listener, app).await?;

    Ok(())
}

fn unix_time() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{secs} seconds since the Unix epoch")
}
