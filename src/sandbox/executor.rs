//! Drives one evaluation from start to a result or a classified error.

use std::borrow::Cow;

use rquickjs::{Context, Ctx, Runtime, Value as JsValue};

use crate::error::{parse_exception_line, ConsoleOutput, Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::fetch::FetchRequest;
use crate::sandbox::limits::{near_memory_limit, Watchdog};
use crate::sandbox::marshal::{self, coerce_string, ConversionLimits};
use crate::sandbox::state::HostState;
use crate::value::Value;

/// Prefix QuickJS puts on parse failures once stringified.
const SYNTAX_ERROR_TAG: &str = "SyntaxError";

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// The completion value of the script, marshalled to the host.
    pub value: Value,
    /// Bytes written through `console.*`, clipped at the configured ceiling.
    pub console_output: Vec<u8>,
    /// Whether console output was clipped.
    pub console_truncated: bool,
    /// Slot for callers that record fetches themselves. Always empty here.
    pub http_requests: Vec<FetchRequest>,
}

impl EvaluationResult {
    /// Get the console output as a string, replacing invalid UTF-8.
    pub fn console_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.console_output)
    }
}

/// How the engine left the evaluation, before timeout and deferral checks.
enum Outcome {
    Completed(Value),
    /// The script threw while a handler failure was parked; the thrown value
    /// has been discarded unread.
    Deferred,
    Failed(EngineFailure),
}

/// A failed engine call, captured inside the context and classified after
/// leaving it.
pub(crate) enum EngineFailure {
    Thrown(ThrownValue),
    Engine(rquickjs::Error),
}

impl EngineFailure {
    /// Take the pending exception for `Error::Exception`, keep anything else.
    pub(crate) fn capture<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => {
                EngineFailure::Thrown(ThrownValue::capture(ctx, ctx.catch()))
            }
            err => EngineFailure::Engine(err),
        }
    }

    /// Must run outside `Context::with`: it reads the runtime's heap usage.
    pub(crate) fn classify(self, runtime: &Runtime, console: ConsoleOutput) -> SandboxError {
        match self {
            EngineFailure::Thrown(thrown) => {
                log_debug!(message = %thrown.message, "evaluation threw");
                thrown.classify(console, near_memory_limit(runtime))
            }
            EngineFailure::Engine(rquickjs::Error::Allocation) => {
                SandboxError::MemoryLimitExceeded { console }
            }
            EngineFailure::Engine(err) => SandboxError::ExecutionFailed(err.to_string()),
        }
    }
}

/// A thrown script value reduced to strings.
#[derive(Debug, Clone)]
pub(crate) struct ThrownValue {
    pub(crate) message: String,
    pub(crate) stack: String,
    /// The engine throws a bare `null` when it cannot allocate an error.
    pub(crate) null: bool,
}

impl ThrownValue {
    /// Stringify a caught value and read its `stack`, if it has one.
    pub(crate) fn capture<'js>(ctx: &Ctx<'js>, thrown: JsValue<'js>) -> Self {
        let message = coerce_string(ctx, &thrown).unwrap_or_else(|_| {
            let _ = ctx.catch();
            "Unknown JavaScript error".to_string()
        });

        let stack = match thrown.as_object() {
            Some(object) => {
                let read = object.get::<_, JsValue>("stack").and_then(|stack| {
                    if stack.is_null() || stack.is_undefined() {
                        Ok(String::new())
                    } else {
                        coerce_string(ctx, &stack)
                    }
                });
                read.unwrap_or_else(|_| {
                    let _ = ctx.catch();
                    String::new()
                })
            }
            None => String::new(),
        };

        Self {
            message,
            stack,
            null: thrown.is_null(),
        }
    }

    /// Syntax errors by tag. Out-of-memory by the engine's message, a bare
    /// `null`, or a heap left at its ceiling. Everything else is a script
    /// error.
    pub(crate) fn classify(self, console: ConsoleOutput, heap_exhausted: bool) -> SandboxError {
        if self.message.starts_with(SYNTAX_ERROR_TAG) {
            return SandboxError::Syntax {
                message: self.message,
                stack: self.stack,
                console,
            };
        }

        let out_of_memory_message = parse_exception_line(&self.message)
            .map(|line| line.name == "InternalError" && line.message.starts_with("out of memory"))
            .unwrap_or(false);
        if out_of_memory_message || self.null || heap_exhausted {
            return SandboxError::MemoryLimitExceeded { console };
        }

        SandboxError::Script {
            message: self.message,
            stack: self.stack,
            console,
        }
    }
}

/// Run `source` to completion or abort and classify the outcome.
///
/// Per-run state is reset first. A timeout wins over every other outcome;
/// a parked fetch failure wins over the script's own exception.
pub(crate) fn run_evaluation(
    runtime: &Runtime,
    context: &Context,
    state: &HostState,
    watchdog: &Watchdog,
    config: &SandboxConfig,
    source: &str,
) -> Result<EvaluationResult> {
    state.begin_run();
    watchdog.arm();

    let limits = ConversionLimits::for_heap(config.max_memory, watchdog);
    let outcome = context.with(|ctx| evaluate_in(&ctx, state, limits, source));

    let elapsed = watchdog.elapsed();
    watchdog.disarm();
    let console = state.console_snapshot();

    if watchdog.timed_out() {
        state.take_deferred();
        log_debug!(elapsed = ?elapsed, "evaluation timed out");
        return Err(SandboxError::Timeout {
            timeout: watchdog.timeout(),
            console,
        });
    }

    match outcome {
        Outcome::Completed(value) => {
            // A fetch failure the script caught itself is not an error.
            state.take_deferred();
            runtime.run_gc();
            log_debug!(
                elapsed = ?elapsed,
                console_bytes = console.bytes.len(),
                truncated = console.truncated,
                "evaluation completed"
            );
            Ok(EvaluationResult {
                value,
                console_output: console.bytes,
                console_truncated: console.truncated,
                http_requests: Vec::new(),
            })
        }
        Outcome::Deferred => {
            runtime.run_gc();
            match state.take_deferred() {
                Some(failure) => Err(failure.into_sandbox_error(console)),
                None => Err(SandboxError::ExecutionFailed(
                    "deferred fetch failure disappeared".to_string(),
                )),
            }
        }
        Outcome::Failed(failure) => Err(failure.classify(runtime, console)),
    }
}

fn evaluate_in<'js>(
    ctx: &Ctx<'js>,
    state: &HostState,
    limits: ConversionLimits<'_>,
    source: &str,
) -> Outcome {
    let result = ctx
        .eval::<JsValue, _>(source)
        .and_then(|value| marshal::from_js(ctx, &value, limits));

    match result {
        Ok(value) => Outcome::Completed(value),
        Err(rquickjs::Error::Exception) if state.has_deferred() => {
            drop(ctx.catch());
            Outcome::Deferred
        }
        Err(err) => Outcome::Failed(EngineFailure::capture(ctx, err)),
    }
}
