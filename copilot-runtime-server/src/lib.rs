//! HTTP transport for the Copilot Runtime.
//!
//! Mounts a [`CopilotRuntime`](copilot_runtime_core::CopilotRuntime) on an
//! axum router. Each POST starts a run and streams its events back as
//! line-framed text; closing the connection cancels the run.
//!
//! # Example
//!
//! ```rust,no_run
//! use copilot_runtime_core::{adapter::OpenAiAdapter, CopilotRuntime};
//! use copilot_runtime_server::RuntimeRouter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = CopilotRuntime::builder()
//!     .service_adapter(OpenAiAdapter::from_env()?)
//!     .build()?;
//!
//! let app = RuntimeRouter::new(runtime)
//!     .with_endpoint("/api/copilotkit")
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub(crate) mod handler;
pub mod router;
pub(crate) mod state;

pub use error::{BuildError, ServerError, ServerResult};
pub use handler::STREAM_DATA_HEADER;
pub use router::RuntimeRouter;
