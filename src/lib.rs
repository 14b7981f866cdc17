//! # JavaScript Sandbox
//!
//! An embedded QuickJS engine wrapped as a constrained, inspectable sandbox.
//!
//! Callers hand the sandbox script source and get back either the script's
//! completion value converted to a host [`Value`], or a classified
//! [`SandboxError`]. Every evaluation runs under:
//!
//! - **Memory limit**: the engine's allocator refuses to grow past a ceiling
//! - **Timeout**: an interrupt hook aborts scripts that run too long, even
//!   tight loops and `try`/`catch` wrapped ones
//! - **Bounded console capture**: `console.*` output is kept up to a byte
//!   ceiling and flagged when clipped
//! - **Mediated fetch**: the only way out is a synchronous `fetch` call that
//!   the host answers through a [`FetchHandler`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use quickjs_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_millis(500))
//!         .max_memory(8 * 1024 * 1024)
//!         .build();
//!
//!     let mut sandbox = JsSandbox::new(config)?;
//!     sandbox.set_global("name", "world")?;
//!
//!     let result = sandbox.evaluate("console.log('hi'); `hello ${name}`")?;
//!     assert_eq!(result.value, Value::from("hello world"));
//!     assert_eq!(result.console_text(), "hi\n");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Threading
//!
//! A [`JsSandbox`] owns its engine exclusively and is not `Send`; run one per
//! thread. [`SandboxRunner`] evaluates in fresh sandboxes on tokio's blocking
//! pool for async callers.

// Logging is compiled out without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! log_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

pub mod error;
pub mod prelude;
pub mod sandbox;
pub mod value;

// Re-export main types at crate root for convenience
pub use error::{ConsoleOutput, Result, SandboxError};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::EvaluationResult;
pub use sandbox::fetch::{FetchError, FetchErrorKind, FetchHandler, FetchRequest, FetchResponse};
pub use sandbox::instance::JsSandbox;
pub use sandbox::runner::SandboxRunner;
pub use value::{Map, Value};
