//! The `fetch` bridge: a synchronous call from script code into a host handler.
//!
//! The sandbox never performs network I/O itself. A script calling
//! `fetch(url, options)` hands a [`FetchRequest`] to the registered
//! [`FetchHandler`] and receives a plain response object built from the
//! handler's [`FetchResponse`]:
//!
//! ```text
//! { status, statusText, ok, body, headers: {} }
//! ```
//!
//! Handler failures cannot be propagated through the engine's stack. They are
//! parked on the sandbox, the script sees a generic `InternalError`, and the
//! real error is raised by `evaluate` once the engine has unwound.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rquickjs::function::Rest;
use rquickjs::{Atom, Ctx, Exception, Function, Object, Value as JsValue};
use thiserror::Error;

use crate::error::{ConsoleOutput, SandboxError};
use crate::sandbox::marshal::coerce_string;
use crate::sandbox::state::HostState;

/// Script-visible message when no handler is registered.
pub const FETCH_DISABLED_MESSAGE: &str = "fetch() is not enabled - HTTP callback not configured";

/// Script-visible message standing in for a deferred handler failure.
pub const FETCH_FAILED_MESSAGE: &str = "HTTP request failed";

/// A request issued by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// HTTP method, `GET` unless the script set `options.method`.
    pub method: String,
    /// The first argument to `fetch`, coerced to a string.
    pub url: String,
    /// `options.body`, coerced to a string.
    pub body: Option<String>,
    /// Own properties of `options.headers`, values coerced to strings.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A `GET` request with no body or headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A handler's answer. Missing fields take the defaults `200`, `"OK"`, `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub body: Option<String>,
}

impl FetchResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn status_text(&self) -> &str {
        self.status_text.as_deref().unwrap_or("OK")
    }

    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// `true` for 2xx statuses.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status())
    }
}

/// The reserved classes of fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The request was refused by policy (e.g. host not allowed).
    Blocked,
    /// A request budget was exhausted.
    Limited,
    /// The request was attempted and failed.
    Failed,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Blocked => f.write_str("blocked"),
            FetchErrorKind::Limited => f.write_str("limited"),
            FetchErrorKind::Failed => f.write_str("failed"),
        }
    }
}

/// Errors a [`FetchHandler`] may return.
///
/// The three reserved kinds come back out of `evaluate` as
/// [`SandboxError::Fetch`] carrying the console output captured so far.
/// [`FetchError::Other`] is returned unchanged as [`SandboxError::Host`].
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    Blocked(String),

    #[error("{0}")]
    Limited(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    /// The reserved kind, or `None` for [`FetchError::Other`].
    pub fn kind(&self) -> Option<FetchErrorKind> {
        match self {
            FetchError::Blocked(_) => Some(FetchErrorKind::Blocked),
            FetchError::Limited(_) => Some(FetchErrorKind::Limited),
            FetchError::Failed(_) => Some(FetchErrorKind::Failed),
            FetchError::Other(_) => None,
        }
    }

    pub(crate) fn into_sandbox_error(self, console: ConsoleOutput) -> SandboxError {
        let (kind, message) = match self {
            FetchError::Blocked(message) => (FetchErrorKind::Blocked, message),
            FetchError::Limited(message) => (FetchErrorKind::Limited, message),
            FetchError::Failed(message) => (FetchErrorKind::Failed, message),
            FetchError::Other(err) => return SandboxError::Host(err),
        };
        SandboxError::Fetch {
            kind,
            message,
            console,
        }
    }
}

/// Host-side implementation of `fetch`.
///
/// Called synchronously while the script is suspended. Implementations must
/// not evaluate code on the sandbox that is calling them. Retries, if any,
/// belong here; the bridge makes exactly one call per `fetch`.
pub trait FetchHandler {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

impl<F> FetchHandler for F
where
    F: Fn(&FetchRequest) -> Result<FetchResponse, FetchError>,
{
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self(request)
    }
}

/// Install the global `fetch(url, options?)`. It exists whether or not a
/// handler is registered and fails at call time without one.
pub(crate) fn install_fetch<'js>(ctx: &Ctx<'js>, state: Rc<HostState>) -> rquickjs::Result<()> {
    let fetch = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            call_fetch(&ctx, &state, args.0)
        },
    )?;
    ctx.globals().set("fetch", fetch)
}

fn call_fetch<'js>(
    ctx: &Ctx<'js>,
    state: &HostState,
    args: Vec<JsValue<'js>>,
) -> rquickjs::Result<JsValue<'js>> {
    let Some(handler) = state.handler() else {
        return Err(Exception::throw_type(ctx, FETCH_DISABLED_MESSAGE));
    };

    let mut args = args.into_iter();
    let Some(target) = args.next() else {
        return Err(Exception::throw_type(
            ctx,
            "fetch() requires at least 1 argument (url)",
        ));
    };
    let url = match coerce_string(ctx, &target) {
        Ok(url) => url,
        Err(_) => {
            let _ = ctx.catch();
            return Err(Exception::throw_type(ctx, "fetch() url must be a string"));
        }
    };

    let mut request = FetchRequest::get(url);
    if let Some(options) = args.next() {
        read_options(ctx, &options, &mut request)?;
    }

    log_debug!(method = %request.method, url = %request.url, "fetch: calling handler");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.fetch(&request)));
    let failure = match outcome {
        Ok(Ok(response)) => return build_response(ctx, &response),
        Ok(Err(err)) => err,
        Err(payload) => FetchError::Other(anyhow::anyhow!(
            "fetch handler panicked: {}",
            panic_message(payload.as_ref())
        )),
    };

    log_warn!(url = %request.url, error = %failure, "fetch: handler failed, deferring");
    state.defer(failure);
    Err(Exception::throw_internal(ctx, FETCH_FAILED_MESSAGE))
}

/// Read `method`, `body` and `headers` from an options object. Anything that
/// is not an object is ignored.
fn read_options<'js>(
    ctx: &Ctx<'js>,
    options: &JsValue<'js>,
    request: &mut FetchRequest,
) -> rquickjs::Result<()> {
    let Some(options) = options.as_object() else {
        return Ok(());
    };

    if let Some(method) = string_property(ctx, options, "method")? {
        request.method = method;
    }
    request.body = string_property(ctx, options, "body")?;

    let headers: JsValue = options.get("headers")?;
    if let Some(headers) = headers.as_object() {
        for prop in headers.props::<Atom<'js>, JsValue<'js>>() {
            let (name, value) = prop?;
            let name = coerce_string(ctx, &name.to_value()?)?;
            request.headers.push((name, coerce_string(ctx, &value)?));
        }
    }
    Ok(())
}

/// A property coerced to a string, `None` when it is `null` or `undefined`.
fn string_property<'js>(
    ctx: &Ctx<'js>,
    object: &Object<'js>,
    key: &str,
) -> rquickjs::Result<Option<String>> {
    let value: JsValue = object.get(key)?;
    if value.is_null() || value.is_undefined() {
        return Ok(None);
    }
    coerce_string(ctx, &value).map(Some)
}

fn build_response<'js>(ctx: &Ctx<'js>, response: &FetchResponse) -> rquickjs::Result<JsValue<'js>> {
    let object = Object::new(ctx.clone())?;
    object.set("status", i32::from(response.status()))?;
    object.set("statusText", response.status_text())?;
    object.set("ok", response.is_ok())?;
    object.set("body", response.body())?;
    object.set("headers", Object::new(ctx.clone())?)?;
    Ok(object.into_value())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let response = FetchResponse::default();
        assert_eq!(response.status(), 200);
        assert_eq!(response.status_text(), "OK");
        assert_eq!(response.body(), "");
        assert!(response.is_ok());
    }

    #[test]
    fn test_response_ok_range() {
        assert!(FetchResponse::ok("").with_status(299).is_ok());
        assert!(!FetchResponse::ok("").with_status(300).is_ok());
        assert!(!FetchResponse::ok("").with_status(199).is_ok());
        assert!(!FetchResponse::ok("").with_status(404).is_ok());
    }

    #[test]
    fn test_request_header_lookup() {
        let mut request = FetchRequest::get("https://example.com");
        request
            .headers
            .push(("Content-Type".to_string(), "text/plain".to_string()));
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("accept"), None);
    }

    #[test]
    fn test_reserved_errors_keep_console() {
        let console = ConsoleOutput {
            bytes: b"before\n".to_vec(),
            truncated: false,
        };
        let err = FetchError::Blocked("host not allowed".into()).into_sandbox_error(console);
        match err {
            SandboxError::Fetch {
                kind,
                message,
                console,
            } => {
                assert_eq!(kind, FetchErrorKind::Blocked);
                assert_eq!(message, "host not allowed");
                assert_eq!(console.text(), "before\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FetchError::Blocked(String::new()).kind(),
            Some(FetchErrorKind::Blocked)
        );
        assert_eq!(
            FetchError::Limited(String::new()).kind(),
            Some(FetchErrorKind::Limited)
        );
        assert_eq!(
            FetchError::Failed(String::new()).kind(),
            Some(FetchErrorKind::Failed)
        );
        assert_eq!(FetchError::Other(anyhow::anyhow!("x")).kind(), None);
        assert_eq!(FetchErrorKind::Limited.to_string(), "limited");
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = FetchError::Other(anyhow::anyhow!("socket closed"))
            .into_sandbox_error(ConsoleOutput::default());
        assert!(matches!(err, SandboxError::Host(_)));
        assert_eq!(err.to_string(), "socket closed");
    }

    #[test]
    fn test_closure_handler() {
        let handler = |request: &FetchRequest| -> Result<FetchResponse, FetchError> {
            Ok(FetchResponse::ok(format!("{} {}", request.method, request.url)))
        };
        let response = handler.fetch(&FetchRequest::get("/ping")).unwrap();
        assert_eq!(response.body(), "GET /ping");
    }
}
