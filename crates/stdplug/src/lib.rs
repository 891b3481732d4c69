//! Typed RPC between a parent process and a plugin child over the child's
//! stdin and stdout.
//!
//! Either side can provide services and either side can call. See
//! [`plugin`] for the entry points.

mod error;
mod factory;
pub mod plugin;
pub mod rpc;

pub use error::{CodecError, RegisterError, RpcError};
pub use factory::{PlatformSpawner, PluginChannel, platform_factory, platform_name};
pub use plugin::{
    drive, drive_with_codec, start_consumer, start_consumer_via, start_consumer_with_codec,
    start_provider, start_provider_via, start_provider_with_codec,
};
pub use rpc::{JsonCodec, Methods, MsgPackCodec, Provider, RpcClient, Service, WireCodec};

// Re-export core functionality
pub use stdplug_core::*;
