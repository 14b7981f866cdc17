//! Security tests to verify sandbox isolation.
//!
//! These tests try to escape the configured limits or reach host facilities
//! and verify the sandbox contains them.

use std::time::{Duration, Instant};

use quickjs_sandbox_rs::prelude::*;

/// Helper to create a test sandbox config.
fn test_config() -> SandboxConfig {
    SandboxConfig::builder()
        .timeout(Duration::from_millis(200))
        .max_memory(4 * 1024 * 1024)
        .build()
}

fn eval_typeof(sandbox: &mut JsSandbox, name: &str) -> Value {
    sandbox
        .evaluate(&format!("typeof {name}"))
        .unwrap()
        .value
}

/// Test that infinite loops are properly terminated.
#[test]
fn test_infinite_loop_timeout() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    let result = sandbox.evaluate("while (true) {}");
    assert!(
        matches!(result, Err(SandboxError::Timeout { .. })),
        "infinite loop should timeout"
    );
}

/// Test that the timeout survives attempts to swallow the interrupt.
#[test]
fn test_timeout_survives_catch_and_finally() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    let result = sandbox.evaluate(
        r#"
for (;;) {
    try {
        while (true) {}
    } catch (e) {
        console.log('caught ' + e);
    } finally {
        continue;
    }
}
"#,
    );
    assert!(result.unwrap_err().is_timeout());
}

/// Test that nested eval and the Function constructor are still bounded.
#[test]
fn test_dynamic_code_is_bounded() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    for source in [
        "eval('while (true) {}')",
        "new Function('for (;;) {}')()",
        "(function spin() { while (true) {} })()",
    ] {
        let start = Instant::now();
        let err = sandbox.evaluate(source).unwrap_err();
        assert!(err.is_timeout(), "{source} should time out, got {err:?}");
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

/// Test that the timeout clock restarts for every evaluation.
#[test]
fn test_timeout_is_per_evaluation() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    for _ in 0..3 {
        let result = sandbox
            .evaluate("{ const end = Date.now() + 50; while (Date.now() < end) {} } 'ok'")
            .unwrap();
        assert_eq!(result.value, Value::from("ok"));
    }
}

/// Test memory exhaustion protection.
#[test]
fn test_memory_exhaustion_protection() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .max_memory(2 * 1024 * 1024)
        .build();
    let mut sandbox = JsSandbox::new(config).unwrap();

    let result = sandbox.evaluate(
        r#"
(function () {
    const hoard = [];
    while (true) {
        hoard.push(new Array(1000).fill(1));
    }
})()
"#,
    );

    match result {
        Err(err) => assert!(err.is_memory_limit(), "unexpected error: {err:?}"),
        Ok(_) => panic!("unbounded allocation should fail"),
    }
}

/// Test that string doubling hits the heap ceiling rather than the host.
#[test]
fn test_string_growth_is_bounded() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .max_memory(2 * 1024 * 1024)
        .build();
    let mut sandbox = JsSandbox::new(config).unwrap();

    let err = sandbox
        .evaluate("(function () { let s = 'x'; while (true) { s = s + s; } })()")
        .unwrap_err();
    assert!(err.is_memory_limit(), "unexpected error: {err:?}");
}

/// Test that a sparse array cannot make the host allocate past the ceiling.
#[test]
fn test_sparse_array_result_is_bounded() {
    let mut sandbox = JsSandbox::new(SandboxConfig::default()).unwrap();

    let start = Instant::now();
    let err = sandbox
        .evaluate("const a = []; a.length = 2 ** 32 - 1; a")
        .unwrap_err();
    assert!(err.is_script_error(), "unexpected error: {err:?}");
    assert!(err.to_string().contains("value too large to convert"));
    assert!(start.elapsed() < Duration::from_secs(2));

    assert_eq!(sandbox.evaluate("a.length").unwrap().value, Value::Integer(u32::MAX as i64));
}

/// Test that converting the result is subject to the timeout.
#[test]
fn test_result_conversion_times_out() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(200))
        .max_memory(64 * 1024 * 1024)
        .build();
    let mut sandbox = JsSandbox::new(config).unwrap();

    let start = Instant::now();
    let err = sandbox
        .evaluate("const a = []; a.length = 1e8; a")
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(start.elapsed() < Duration::from_secs(2));
}

/// Test that runaway recursion is reported and the sandbox stays usable.
#[test]
fn test_deep_recursion_contained() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    let err = sandbox
        .evaluate("function f(n) { return f(n + 1) + 1 } f(0)")
        .unwrap_err();
    assert!(
        err.is_script_error() || err.is_memory_limit(),
        "unexpected error: {err:?}"
    );

    let result = sandbox.evaluate("'still alive'").unwrap();
    assert_eq!(result.value, Value::from("still alive"));
}

/// Test that no module loader or OS bindings are exposed.
#[test]
fn test_host_facilities_absent() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    for name in [
        "require", "process", "std", "os", "Deno", "XMLHttpRequest", "setTimeout",
    ] {
        assert_eq!(
            eval_typeof(&mut sandbox, name),
            Value::from("undefined"),
            "{name} should not be defined"
        );
    }
}

/// Test that network access only exists through the host handler.
#[test]
fn test_network_access_blocked() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    let result = sandbox
        .evaluate(
            r#"
try {
    fetch('http://169.254.169.254/latest/meta-data/');
    'SECURITY_BREACH';
} catch (e) {
    'BLOCKED: ' + e.message;
}
"#,
        )
        .unwrap();
    let text = result.value.as_str().unwrap().to_string();
    assert!(!text.contains("SECURITY_BREACH"));
    assert!(text.contains("HTTP callback not configured"));
}

/// Test that console flooding cannot grow host memory past the ceiling.
#[test]
fn test_console_flood_is_bounded() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .console_max_bytes(1024)
        .build();
    let mut sandbox = JsSandbox::new(config).unwrap();

    let result = sandbox
        .evaluate("for (let i = 0; i < 10000; i++) console.log('spam line ' + i); 'done'")
        .unwrap();
    assert_eq!(result.value, Value::from("done"));
    assert_eq!(result.console_output.len(), 1024);
    assert!(result.console_truncated);
    assert!(result.console_text().starts_with("spam line 0\n"));
}

/// Test that a throwing toString cannot break console capture. The
/// argument is dropped but its separator is kept.
#[test]
fn test_hostile_console_argument() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();

    let result = sandbox
        .evaluate(
            r#"
const evil = { toString() { throw new Error('nope'); } };
console.log('a', evil, 'b');
'ok'
"#,
        )
        .unwrap();
    assert_eq!(result.value, Value::from("ok"));
    assert_eq!(result.console_text(), "a  b\n");
}

/// Test that separate sandboxes do not share globals.
#[test]
fn test_sandboxes_are_isolated() {
    let mut first = JsSandbox::new(test_config()).unwrap();
    let mut second = JsSandbox::new(test_config()).unwrap();

    first.evaluate("globalThis.secret = 'hunter2'").unwrap();
    first.evaluate("Object.prototype.polluted = true").unwrap();

    assert_eq!(eval_typeof(&mut second, "secret"), Value::from("undefined"));
    assert_eq!(
        second.evaluate("({}).polluted === undefined").unwrap().value,
        Value::Boolean(true)
    );
}

/// Test that the host-facing globals cannot be abused to reach handler state.
#[test]
fn test_overwriting_fetch_only_affects_script() {
    let mut sandbox = JsSandbox::new(test_config()).unwrap();
    sandbox.register_fetch_handler(
        |_: &FetchRequest| -> std::result::Result<FetchResponse, FetchError> {
            Ok(FetchResponse::ok("real"))
        },
    );

    let result = sandbox
        .evaluate("globalThis.fetch = () => ({ body: 'fake' }); fetch('/').body")
        .unwrap();
    assert_eq!(result.value, Value::from("fake"));
    assert!(sandbox.has_fetch_handler());
}
