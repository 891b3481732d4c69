use anyhow::Context;
use stdplug::{ChannelConfig, StderrSink, start_consumer};
use stdplug_demos::{HostApi, HostApi2, binary_path, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = binary_path("driver")?;
    let config = ChannelConfig::new(path.to_string_lossy(), Vec::<String>::new());

    let mut server = start_consumer(&config, StderrSink::Inherit).context("failed to start driver")?;
    server.register(HostApi).context("failed to register Host")?;
    server.register(HostApi2).context("failed to register Host2")?;
    server.serve().await?;

    Ok(())
}
