//! Router builder for runtime HTTP endpoints.

use axum::{routing::post, Router};
use copilot_runtime_core::CopilotRuntime;
use tower_http::cors::CorsLayer;

use crate::error::BuildError;
use crate::handler::{info_handler, stream_handler};
use crate::state::AppState;

/// Builder for configuring runtime HTTP endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use copilot_runtime_core::{adapter::EmptyAdapter, CopilotRuntime};
/// use copilot_runtime_server::RuntimeRouter;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = CopilotRuntime::builder().service_adapter(EmptyAdapter).build()?;
///
/// // POST /api/copilotkit streams runs, POST /api/copilotkit/info lists agents
/// let app = RuntimeRouter::new(runtime)
///     .with_endpoint("/api/copilotkit")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeRouter {
    runtime: CopilotRuntime,
    paths: Vec<String>,
    cors: Option<CorsLayer>,
}

impl RuntimeRouter {
    pub fn new(runtime: CopilotRuntime) -> Self {
        Self {
            runtime,
            paths: Vec::new(),
            cors: Some(CorsLayer::permissive()),
        }
    }

    /// Mount the runtime at `path`.
    ///
    /// Runs stream from `POST {path}` and discovery answers on
    /// `POST {path}/info`. May be called more than once.
    pub fn with_endpoint(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Replace the default permissive CORS policy.
    pub fn cors(mut self, layer: CorsLayer) -> Self {
        self.cors = Some(layer);
        self
    }

    /// Serve without a CORS layer, e.g. behind a proxy that adds its own.
    pub fn without_cors(mut self) -> Self {
        self.cors = None;
        self
    }

    /// Build the router with all configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoEndpoints`] if no endpoints were configured and
    /// [`BuildError::InvalidPath`] for a path that does not start with `/`.
    pub fn build(self) -> Result<Router, BuildError> {
        if self.paths.is_empty() {
            return Err(BuildError::NoEndpoints);
        }

        let mut router = Router::new();
        for path in &self.paths {
            if !path.starts_with('/') {
                return Err(BuildError::InvalidPath(path.clone()));
            }
            let base = match path.trim_end_matches('/') {
                "" => "/",
                trimmed => trimmed,
            };
            let info = match base {
                "/" => "/info".to_string(),
                _ => format!("{base}/info"),
            };
            router = router
                .route(base, post(stream_handler))
                .route(&info, post(info_handler));
        }

        let router = router.with_state(AppState::new(self.runtime));
        Ok(match self.cors {
            Some(cors) => router.layer(cors),
            None => router,
        })
    }

    /// Build the router and nest it under a prefix path.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_nested(self, prefix: impl Into<String>) -> Result<Router, BuildError> {
        Ok(Router::new().nest(&prefix.into(), self.build()?))
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
