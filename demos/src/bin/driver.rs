use anyhow::Context;
use stdplug::drive;
use stdplug_demos::init_tracing;
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    // stdin is read on a blocking thread that only returns once the host hangs up
    runtime.shutdown_background();
    result
}

async fn run() -> anyhow::Result<()> {
    let client = drive();

    let hi: String = client
        .call("Host.SayHi", "plugin")
        .await
        .context("failed saying hi")?;
    info!(response = %hi, "Got response from host");

    let bye: String = client
        .call("Host2.SayBye", "plugin")
        .await
        .context("failed saying bye")?;
    info!(response = %bye, "Got response from host");

    client.close().await?;
    Ok(())
}
