//! The sandbox instance: one engine runtime and context plus per-run state.

use std::rc::Rc;

use rquickjs::{Context, Runtime};

use crate::error::{ConsoleOutput, Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::{run_evaluation, EngineFailure, EvaluationResult};
use crate::sandbox::fetch::{install_fetch, FetchHandler};
use crate::sandbox::io::install_console;
use crate::sandbox::limits::{apply_memory_limit, install_interrupt_handler, Watchdog};
use crate::sandbox::marshal;
use crate::sandbox::state::HostState;
use crate::value::Value;

/// The engine pair. Field order is drop order: the context goes first.
struct Engine {
    context: Context,
    runtime: Runtime,
}

/// A sandboxed JavaScript execution environment.
///
/// Each sandbox exclusively owns one QuickJS runtime and context. Globals set
/// by the host or by earlier scripts persist across evaluations; console
/// output and timeout state are reset at the start of every evaluation.
///
/// A sandbox is not `Send`. Use one sandbox per thread, or
/// [`SandboxRunner`](crate::sandbox::runner::SandboxRunner) to evaluate on a
/// worker thread from async code.
pub struct JsSandbox {
    config: SandboxConfig,
    engine: Option<Engine>,
    state: Rc<HostState>,
    watchdog: Rc<Watchdog>,
}

impl JsSandbox {
    /// Create a new sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Runtime::new().map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to create JavaScript runtime: {}", e))
        })?;

        let watchdog = Rc::new(Watchdog::new(config.timeout));
        install_interrupt_handler(&runtime, Rc::clone(&watchdog));

        let context = Context::full(&runtime).map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to create JavaScript context: {}", e))
        })?;

        let state = Rc::new(HostState::new(config.console_max_bytes));
        context
            .with(|ctx| -> rquickjs::Result<()> {
                install_console(&ctx, Rc::clone(&state))?;
                install_fetch(&ctx, Rc::clone(&state))
            })
            .map_err(|e| {
                SandboxError::RuntimeInit(anyhow::anyhow!("failed to install sandbox globals: {}", e))
            })?;

        apply_memory_limit(&runtime, config.max_memory);

        log_debug!(
            max_memory = config.max_memory,
            timeout = ?config.timeout,
            console_max_bytes = config.console_max_bytes,
            "sandbox created"
        );

        Ok(Self {
            config,
            engine: Some(Engine { context, runtime }),
            state,
            watchdog,
        })
    }

    /// Get the configuration this sandbox was created with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate a script and return its completion value.
    ///
    /// # Errors
    /// * [`SandboxError::Timeout`] if the script ran past the configured timeout
    /// * [`SandboxError::Syntax`] / [`SandboxError::Script`] for parse failures
    ///   and uncaught exceptions
    /// * [`SandboxError::MemoryLimitExceeded`] if the engine hit the heap ceiling
    /// * [`SandboxError::Fetch`] / [`SandboxError::Host`] if the fetch handler
    ///   failed and the script did not catch the resulting exception
    /// * [`SandboxError::Destroyed`] after [`JsSandbox::destroy`]
    ///
    /// The sandbox stays usable after any of these except `Destroyed`.
    pub fn evaluate(&mut self, source: &str) -> Result<EvaluationResult> {
        let engine = self.engine.as_ref().ok_or(SandboxError::Destroyed)?;
        run_evaluation(
            &engine.runtime,
            &engine.context,
            &self.state,
            &self.watchdog,
            &self.config,
            source,
        )
    }

    /// Marshal a host value into the script global scope under `name`.
    pub fn set_global(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if name.is_empty() {
            return Err(SandboxError::InvalidArgument(
                "variable name cannot be empty".to_string(),
            ));
        }
        let engine = self.engine.as_ref().ok_or(SandboxError::Destroyed)?;
        let value = value.into();

        let assigned = engine.context.with(|ctx| {
            marshal::to_js(&ctx, &value)
                .and_then(|js| ctx.globals().set(name, js))
                .map_err(|err| EngineFailure::capture(&ctx, err))
        });
        assigned.map_err(|failure| {
            failure.classify(&engine.runtime, ConsoleOutput::default())
        })
    }

    /// Register the handler behind the script's `fetch`, replacing any
    /// previous one.
    pub fn register_fetch_handler<H>(&mut self, handler: H)
    where
        H: FetchHandler + 'static,
    {
        *self.state.handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Remove the fetch handler. `fetch` stays defined but throws when called.
    pub fn clear_fetch_handler(&mut self) {
        self.state.handler.borrow_mut().take();
    }

    /// Whether a fetch handler is registered.
    pub fn has_fetch_handler(&self) -> bool {
        self.state.handler.borrow().is_some()
    }

    /// Bytes currently allocated by the engine, as tracked by its allocator.
    pub fn memory_usage(&self) -> Option<u64> {
        let engine = self.engine.as_ref()?;
        let usage = engine.runtime.memory_usage();
        u64::try_from(usage.malloc_size).ok()
    }

    /// Release the context, then the runtime, then the console buffer.
    ///
    /// Calling this more than once is harmless. Dropping the sandbox does the
    /// same thing.
    pub fn destroy(&mut self) {
        if let Some(Engine { context, runtime }) = self.engine.take() {
            drop(context);
            drop(runtime);
            self.state.release();
            log_debug!("sandbox destroyed");
        }
    }

    /// Whether [`JsSandbox::destroy`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.engine.is_none()
    }
}

impl Drop for JsSandbox {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for JsSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsSandbox")
            .field("config", &self.config)
            .field("destroyed", &self.is_destroyed())
            .field("fetch_handler", &self.has_fetch_handler())
            .finish()
    }
}
