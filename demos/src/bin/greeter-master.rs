use anyhow::Context;
use stdplug::{ChannelConfig, StderrSink, start_provider};
use stdplug_demos::{binary_path, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = binary_path("greeter-plugin")?;
    let config = ChannelConfig::new(path.to_string_lossy(), Vec::<String>::new());
    let client = start_provider(&config, StderrSink::Inherit).context("error running plugin")?;

    let reply: anyhow::Result<String> = client
        .call("Greeter.SayHi", "master")
        .await
        .context("error calling SayHi");
    client.close().await?;

    info!(response = %reply?, "Response from plugin");
    Ok(())
}
