use stdplug_core::ChannelError;
use thiserror::Error;

/// Failure to turn a value into a frame or back
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Rejected service registrations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("no service name for type")]
    EmptyName,

    #[error("type {0} has no exported methods of suitable type")]
    NoMethods(String),

    #[error("service already defined: {0}")]
    Duplicate(String),
}

/// Errors surfaced by RPC clients and servers
#[derive(Error, Debug)]
pub enum RpcError {
    /// The connection is closed or its reader has stopped
    #[error("connection is shut down")]
    Shutdown,

    /// Error message returned by the remote method
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended between a header and its body")]
    UnexpectedEof,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("reply reader task failed: {0}")]
    ReaderFailed(String),
}

impl RpcError {
    /// Check if the remote side answered with an error
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }
}
