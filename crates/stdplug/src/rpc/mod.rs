//! Request/response RPC over any [`stdplug_core::Conn`].
//!
//! Every message is a header frame followed by a body frame. Requests name a
//! `"Service.Method"` and carry a sequence number that the response echoes.

mod client;
mod codec;
mod protocol;
mod server;
mod service;

pub use client::RpcClient;
pub use codec::{JsonCodec, JsonLines, MsgPackCodec, WireCodec};
pub use protocol::{RequestHeader, ResponseHeader};
pub use server::Provider;
pub use service::{Methods, Service};
