//! Basic example of evaluating JavaScript in the sandbox.
//!
//! Run with: RUST_LOG=quickjs_sandbox_rs=debug cargo run --example basic_evaluation

use std::time::Duration;

use quickjs_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(500))
        .max_memory(8 * 1024 * 1024) // 8MB
        .console_max_bytes(4096)
        .build();

    println!("Creating sandbox with config: {:?}", config);
    let mut sandbox = JsSandbox::new(config)?;

    println!("\n=== Test 1: Simple arithmetic ===");
    let result = sandbox.evaluate("1 + 1")?;
    println!("value: {:?}", result.value);

    println!("\n=== Test 2: Console output ===");
    let result = sandbox.evaluate(
        r#"
for (let i = 0; i < 3; i++) {
    console.log(`Count: ${i}`);
}
'done'
"#,
    )?;
    print!("console:\n{}", result.console_text());
    println!("value: {:?}", result.value);

    println!("\n=== Test 3: Globals in, structures out ===");
    let mut order = Map::new();
    order.insert("customer", "ada");
    order.insert("items", vec![3, 4, 5]);
    sandbox.set_global("order", order)?;
    let result = sandbox.evaluate(
        "({ customer: order.customer.toUpperCase(), total: order.items.reduce((a, b) => a + b, 0) })",
    )?;
    println!("value: {:?}", result.value);

    println!("\n=== Test 4: Script error ===");
    match sandbox.evaluate("console.log('about to fail'); undefinedFunction()") {
        Ok(result) => println!("unexpected success: {:?}", result.value),
        Err(e) => {
            println!("error: {}", e);
            if let Some(console) = e.console() {
                print!("console before failure: {}", console.text());
            }
        }
    }

    println!("\n=== Test 5: Timeout ===");
    match sandbox.evaluate("while (true) {}") {
        Ok(_) => println!("unexpected success"),
        Err(e) if e.is_timeout() => println!("timed out as expected: {}", e),
        Err(e) => println!("unexpected error: {}", e),
    }

    println!("\n=== Test 6: Still usable ===");
    let result = sandbox.evaluate("order.items.length")?;
    println!("value: {:?}", result.value);

    if let Some(bytes) = sandbox.memory_usage() {
        println!("\nengine memory in use: {} bytes", bytes);
    }
    sandbox.destroy();

    Ok(())
}
