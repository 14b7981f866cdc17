//! Async front door: evaluate scripts in fresh sandboxes on blocking threads.

use std::sync::Arc;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::EvaluationResult;
use crate::sandbox::fetch::{FetchError, FetchHandler, FetchRequest, FetchResponse};
use crate::sandbox::instance::JsSandbox;
use crate::value::{Map, Value};

/// Evaluates each script in a brand new [`JsSandbox`].
///
/// Engine instances are not `Send`, so every call builds its sandbox inside
/// a `spawn_blocking` task and tears it down there. Nothing leaks between
/// calls; concurrent calls each get their own runtime and context.
///
/// ```rust,ignore
/// let runner = SandboxRunner::new(SandboxConfig::default())
///     .with_global("input", vec![1, 2, 3]);
/// let result = runner.evaluate("input.map(x => x * 2)").await?;
/// ```
#[derive(Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
    globals: Map,
    handler: Option<Arc<dyn FetchHandler + Send + Sync>>,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            globals: Map::new(),
            handler: None,
        }
    }

    /// Preset a global for every evaluation.
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name, value);
        self
    }

    /// Serve `fetch` from a handler shared by all evaluations.
    pub fn with_fetch_handler<H>(mut self, handler: H) -> Self
    where
        H: FetchHandler + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate `source` in a fresh sandbox on the blocking pool.
    pub async fn evaluate(&self, source: &str) -> Result<EvaluationResult> {
        let source = source.to_string();
        let config = self.config.clone();
        let globals = self.globals.clone();
        let handler = self.handler.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut sandbox = JsSandbox::new(config)?;
            for (name, value) in globals {
                sandbox.set_global(&name, value)?;
            }
            if let Some(handler) = handler {
                sandbox.register_fetch_handler(SharedHandler(handler));
            }
            sandbox.evaluate(&source)
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(SandboxError::ExecutionFailed(format!("task panicked: {}", e))),
        }
    }
}

impl std::fmt::Debug for SandboxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRunner")
            .field("config", &self.config)
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("fetch_handler", &self.handler.is_some())
            .finish()
    }
}

/// A thread-safe handler shared into a single-threaded sandbox.
struct SharedHandler(Arc<dyn FetchHandler + Send + Sync>);

impl FetchHandler for SharedHandler {
    fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, FetchError> {
        self.0.fetch(request)
    }
}
