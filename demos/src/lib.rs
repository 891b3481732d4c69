//! Services and helpers shared by the demo binaries.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use stdplug::{Methods, Service, WireCodec};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log to stderr. Stdout belongs to the RPC stream.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Path given as the first argument, or the named binary next to this one.
pub fn binary_path(name: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::args().nth(1).filter(|a| !a.starts_with("--")) {
        return Ok(PathBuf::from(path));
    }

    let exe = std::env::current_exe().context("failed to locate current executable")?;
    let dir = exe.parent().context("executable has no parent directory")?;
    Ok(dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}

pub fn json_requested() -> bool {
    std::env::args().any(|a| a == "--json")
}

/// What the greeter plugin says to `name`
pub fn say_hi(name: &str) -> String {
    name.to_uppercase()
}

pub struct Greeter;

impl Service for Greeter {
    const NAME: &'static str = "Greeter";

    fn methods<K: WireCodec>(m: &mut Methods<Self, K>) {
        m.add("SayHi", |_svc: Arc<Self>, name: String| async move {
            info!(%name, "got call for SayHi");
            Ok(say_hi(&name))
        })
        .add("SayBye", |_svc: Arc<Self>, name: String| async move {
            info!(%name, "got call for SayBye");
            Ok(format!("Bye {name}"))
        });
    }
}

/// Served by the host binary under `Host`
pub struct HostApi;

impl Service for HostApi {
    const NAME: &'static str = "Host";

    fn methods<K: WireCodec>(m: &mut Methods<Self, K>) {
        m.add("SayHi", |_svc: Arc<Self>, name: String| async move {
            info!(%name, "got call for SayHi");
            Ok(format!("Hi {name}"))
        });
    }
}

/// Served by the host binary under `Host2`
pub struct HostApi2;

impl Service for HostApi2 {
    const NAME: &'static str = "Host2";

    fn methods<K: WireCodec>(m: &mut Methods<Self, K>) {
        m.add("SayBye", |_svc: Arc<Self>, name: String| async move {
            info!(%name, "got call for SayBye");
            Ok(format!("Bye {name}"))
        });
    }
}
