//! Error types for the JavaScript sandbox.

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

use crate::sandbox::fetch::FetchErrorKind;

/// Console output captured up to the point an evaluation ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// Raw captured bytes. Truncation may split a UTF-8 sequence.
    pub bytes: Vec<u8>,
    /// Whether output was clipped at the configured ceiling.
    pub truncated: bool,
}

impl ConsoleOutput {
    /// Get the captured output as a string, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Errors that can occur while creating or driving a sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to allocate the engine runtime or context.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// A host-side call was made with bad input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sandbox has already released its engine.
    #[error("sandbox has been destroyed")]
    Destroyed,

    /// The script failed to parse.
    #[error("JavaScript {message}")]
    Syntax {
        message: String,
        stack: String,
        console: ConsoleOutput,
    },

    /// The script threw an uncaught value.
    #[error("JavaScript error: {message}")]
    Script {
        message: String,
        stack: String,
        console: ConsoleOutput,
    },

    /// The evaluation exceeded the configured timeout and was aborted.
    #[error("JavaScript execution timeout exceeded ({timeout:?})")]
    Timeout {
        timeout: Duration,
        console: ConsoleOutput,
    },

    /// The engine refused an allocation past the memory ceiling.
    #[error("memory limit exceeded")]
    MemoryLimitExceeded { console: ConsoleOutput },

    /// The fetch handler rejected a request with one of the reserved kinds.
    #[error("fetch {kind}: {message}")]
    Fetch {
        kind: FetchErrorKind,
        message: String,
        console: ConsoleOutput,
    },

    /// The fetch handler failed with an error of its own; re-raised as-is.
    #[error(transparent)]
    Host(anyhow::Error),

    /// The engine or the worker running it failed outside of script code.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl SandboxError {
    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, SandboxError::MemoryLimitExceeded { .. })
    }

    /// Check if this error represents a parse failure.
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, SandboxError::Syntax { .. })
    }

    /// Check if this error represents an uncaught script exception.
    pub fn is_script_error(&self) -> bool {
        matches!(self, SandboxError::Script { .. })
    }

    /// Check if this error came from a reserved fetch failure.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, SandboxError::Fetch { .. })
    }

    /// Console output captured before the failure, for script-level faults.
    pub fn console(&self) -> Option<&ConsoleOutput> {
        match self {
            SandboxError::Syntax { console, .. }
            | SandboxError::Script { console, .. }
            | SandboxError::Timeout { console, .. }
            | SandboxError::MemoryLimitExceeded { console }
            | SandboxError::Fetch { console, .. } => Some(console),
            _ => None,
        }
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// A stringified script exception split into its constructor name and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionLine<'a> {
    /// The error name, e.g. `TypeError`.
    pub name: &'a str,
    /// Everything after `"Name: "`. Empty when the line is only a name.
    pub message: &'a str,
}

/// Parse a stringified exception such as `"TypeError: x is not a function"`.
///
/// Returns `None` when the text does not start with an identifier that looks
/// like an error name (`...Error` or `Error`), which is the case for thrown
/// strings, numbers and plain objects.
pub fn parse_exception_line(text: &str) -> Option<ExceptionLine<'_>> {
    let first_line = text.lines().next()?;
    let (name, message) = match first_line.find(':') {
        Some(colon) => (&first_line[..colon], first_line[colon + 1..].trim()),
        None => (first_line.trim(), ""),
    };

    if looks_like_error_name(name) {
        Some(ExceptionLine { name, message })
    } else {
        None
    }
}

fn looks_like_error_name(name: &str) -> bool {
    let starts_upper = name
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false);

    starts_upper
        && name.ends_with("Error")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_with_message() {
        let line = parse_exception_line("TypeError: not a function").unwrap();
        assert_eq!(line.name, "TypeError");
        assert_eq!(line.message, "not a function");
    }

    #[test]
    fn test_parse_error_without_message() {
        let line = parse_exception_line("RangeError").unwrap();
        assert_eq!(line.name, "RangeError");
        assert!(line.message.is_empty());
    }

    #[test]
    fn test_parse_only_first_line() {
        let line = parse_exception_line("InternalError: out of memory\n    at <eval>").unwrap();
        assert_eq!(line.name, "InternalError");
        assert_eq!(line.message, "out of memory");
    }

    #[test]
    fn test_parse_rejects_non_errors() {
        assert!(parse_exception_line("").is_none());
        assert!(parse_exception_line("boom").is_none());
        assert!(parse_exception_line("[object Object]").is_none());
        assert!(parse_exception_line("42").is_none());
        assert!(parse_exception_line("Warning: careful").is_none());
    }

    #[test]
    fn test_error_helpers() {
        let timeout = SandboxError::Timeout {
            timeout: Duration::from_millis(100),
            console: ConsoleOutput::default(),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_memory_limit());
        assert!(timeout.console().is_some());

        let memory = SandboxError::MemoryLimitExceeded {
            console: ConsoleOutput::default(),
        };
        assert!(memory.is_memory_limit());

        let script = SandboxError::Script {
            message: "Error: boom".into(),
            stack: String::new(),
            console: ConsoleOutput {
                bytes: b"partial\n".to_vec(),
                truncated: false,
            },
        };
        assert!(script.is_script_error());
        assert_eq!(script.console().unwrap().text(), "partial\n");

        let invalid = SandboxError::InvalidArgument("empty".into());
        assert!(invalid.console().is_none());
    }
}
