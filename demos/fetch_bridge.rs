//! Serving `fetch` from the host, with an allow-list and a request budget.
//!
//! Run with: RUST_LOG=quickjs_sandbox_rs=debug cargo run --example fetch_bridge

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quickjs_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

const ALLOWED_HOST: &str = "https://api.example.com/";
const MAX_REQUESTS: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let issued = Arc::new(AtomicUsize::new(0));
    let budget = Arc::clone(&issued);

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(1))
        .build();
    let runner = SandboxRunner::new(config)
        .with_global("userId", 7)
        .with_fetch_handler(
            move |request: &FetchRequest| -> std::result::Result<FetchResponse, FetchError> {
                if !request.url.starts_with(ALLOWED_HOST) {
                    return Err(FetchError::Blocked(format!(
                        "{} is not on the allow-list",
                        request.url
                    )));
                }
                if budget.fetch_add(1, Ordering::SeqCst) >= MAX_REQUESTS {
                    return Err(FetchError::Limited(format!(
                        "at most {} requests per run",
                        MAX_REQUESTS
                    )));
                }
                let path = &request.url[ALLOWED_HOST.len()..];
                Ok(FetchResponse::ok(format!(r#"{{"path":"{}"}}"#, path)))
            },
        );

    println!("=== Allowed request ===");
    let result = runner
        .evaluate(
            r#"
const res = fetch('https://api.example.com/users/' + userId);
console.log(res.status, res.statusText);
JSON.parse(res.body)
"#,
        )
        .await?;
    print!("console: {}", result.console_text());
    println!("value: {:?}", result.value);

    println!("\n=== Blocked request ===");
    match runner
        .evaluate("console.log('fetching'); fetch('https://evil.example.net/')")
        .await
    {
        Ok(result) => println!("unexpected success: {:?}", result.value),
        Err(e) => println!("error: {} (console: {:?})", e, e.console().map(|c| c.text())),
    }

    println!("\n=== Budget exhausted ===");
    let script = "for (let i = 0; i < 10; i++) fetch('https://api.example.com/items/' + i)";
    match runner.evaluate(script).await {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("error: {}", e),
    }

    println!("\n=== Script handles the failure itself ===");
    let result = runner
        .evaluate("try { fetch('https://api.example.com/more') } catch (e) { 'fallback: ' + e.message }")
        .await?;
    println!("value: {:?}", result.value);

    println!("\nrequests issued: {}", issued.load(Ordering::SeqCst));
    Ok(())
}
