//! Prelude module for convenient imports.

pub use crate::error::{ConsoleOutput, Result, SandboxError};
pub use crate::sandbox::{
    config::SandboxConfig,
    executor::EvaluationResult,
    fetch::{FetchError, FetchErrorKind, FetchHandler, FetchRequest, FetchResponse},
    instance::JsSandbox,
    runner::SandboxRunner,
};
pub use crate::value::{Map, Value};
