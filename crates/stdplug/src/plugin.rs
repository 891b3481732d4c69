//! The four ways to bind RPC to a plugin pairing.
//!
//! | this process is | and serves | entry point |
//! |---|---|---|
//! | the plugin | its parent | [`Provider::stdio`] |
//! | the host | the child | [`start_consumer`] |
//! | the host | nothing; it calls the child | [`start_provider`] |
//! | the plugin | nothing; it calls its parent | [`drive`] |
//!
//! All of them must run inside a tokio runtime.

use crate::error::RpcError;
use crate::factory::{PluginChannel, platform_factory};
use crate::rpc::{MsgPackCodec, Provider, RpcClient, WireCodec};
use stdplug_core::{ChannelConfig, ChannelFactory, ChannelOf, Spawner, StderrSink, StdioConn};
use tracing::info;

/// Spawn the plugin in `config` and return a client for the services it provides.
///
/// Closing the client closes the child's stdio and runs its shutdown sequence.
pub fn start_provider(
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
) -> Result<RpcClient<PluginChannel>, RpcError> {
    start_provider_with_codec(config, stderr, MsgPackCodec)
}

pub fn start_provider_with_codec<K: WireCodec>(
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
    codec: K,
) -> Result<RpcClient<PluginChannel, K>, RpcError> {
    start_provider_via(&platform_factory(), config, stderr, codec)
}

/// [`start_provider_with_codec`] with an explicit channel factory.
pub fn start_provider_via<S: Spawner, K: WireCodec>(
    factory: &ChannelFactory<S>,
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
    codec: K,
) -> Result<RpcClient<ChannelOf<S>, K>, RpcError> {
    let channel = factory.open(config, stderr)?;
    info!(command = %config.command, "Started plugin as provider");
    Ok(RpcClient::with_codec(channel, codec))
}

/// Spawn the plugin in `config` and return a server it can call into.
///
/// Register services on the returned [`Provider`], then serve. Serving ends
/// when the child closes its stdout, and then the child is shut down.
pub fn start_consumer(
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
) -> Result<Provider<PluginChannel>, RpcError> {
    start_consumer_with_codec(config, stderr, MsgPackCodec)
}

pub fn start_consumer_with_codec<K: WireCodec>(
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
    codec: K,
) -> Result<Provider<PluginChannel, K>, RpcError> {
    start_consumer_via(&platform_factory(), config, stderr, codec)
}

/// [`start_consumer_with_codec`] with an explicit channel factory.
pub fn start_consumer_via<S: Spawner, K: WireCodec>(
    factory: &ChannelFactory<S>,
    config: &ChannelConfig,
    stderr: impl Into<StderrSink>,
    codec: K,
) -> Result<Provider<ChannelOf<S>, K>, RpcError> {
    let channel = factory.open(config, stderr)?;
    info!(command = %config.command, "Started plugin as consumer");
    Ok(Provider::with_codec(channel, codec))
}

/// Client for the services the parent process serves on this process's stdio.
///
/// tokio reads stdin on a blocking thread that cannot be cancelled, so a
/// runtime dropped after [`RpcClient::close`] waits for the parent to hang up.
/// Drivers that exit right away should use `Runtime::shutdown_background`.
pub fn drive() -> RpcClient<StdioConn> {
    RpcClient::stdio()
}

pub fn drive_with_codec<K: WireCodec>(codec: K) -> RpcClient<StdioConn, K> {
    RpcClient::stdio_with_codec(codec)
}
