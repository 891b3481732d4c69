use stdplug::{JsonCodec, Provider};
use stdplug_demos::{Greeter, init_tracing, json_requested};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    if json_requested() {
        let mut provider = Provider::stdio_with_codec(JsonCodec);
        provider.register(Greeter)?;
        provider.serve().await?;
    } else {
        let mut provider = Provider::stdio();
        provider.register(Greeter)?;
        provider.serve().await?;
    }

    Ok(())
}
