//! Activities served by an HTTP worker.
//!
//! The worker side binds a local port and serves the `math` activities over
//! `POST /<activity>`. The engine side registers a caller-side protocol
//! provider pointing at it, so every activity call crosses HTTP.
//!
//! Run with `cargo run --example http_worker --features http`.

use hataori::prelude::*;
use hataori::protocol::{HttpTransport, ProtocolProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let worker = ProtocolProvider::new(HttpTransport::bind("127.0.0.1:0".parse()?).await?)
        .with_provider(
            FunctionProvider::new()
                .activity("inc", |x: i64| async move { Ok(x + 1) })
                .activity("square", |x: i64| async move { Ok(x * x) }),
        )?;
    let serving = worker.start_working()?;
    println!("Worker listening on {}", worker.transport().base_url());

    let engine = WorkflowEngine::builder()
        .provider(
            "math",
            ProtocolProvider::new(HttpTransport::connect(worker.transport().base_url())),
        )
        .workflow(
            "inc_then_square",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                let n: i64 = executor.call_as("math", "inc", n).await?;
                executor.call_as::<i64>("math", "square", n).await
            }),
        )
        .build()?;

    let execution = engine.execute("inc_then_square", 4).await?;
    println!("Result: {}", execution.promise.await?);

    serving.abort();
    Ok(())
}
