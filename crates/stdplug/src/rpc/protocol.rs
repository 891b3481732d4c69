use crate::error::RpcError;
use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;

/// Precedes every request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// `"Service.Method"`
    pub service_method: String,
    pub seq: u64,
}

/// Precedes every response body. When `error` is set the body is unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub service_method: String,
    pub seq: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Read the next header frame and the body frame after it.
///
/// `Ok(None)` means the stream ended cleanly before a header.
pub(crate) async fn read_pair<S>(frames: &mut S) -> Result<Option<(BytesMut, BytesMut)>, RpcError>
where
    S: Stream<Item = io::Result<BytesMut>> + Unpin,
{
    let header = match frames.next().await {
        Some(frame) => frame?,
        None => return Ok(None),
    };
    match frames.next().await {
        Some(body) => Ok(Some((header, body?))),
        None => Err(RpcError::UnexpectedEof),
    }
}

/// Write a header and body back to back, then flush.
///
/// Callers hold the writer lock across the call so pairs never interleave.
pub(crate) async fn write_pair<S>(sink: &mut S, header: Bytes, body: Bytes) -> io::Result<()>
where
    S: Sink<Bytes, Error = io::Error> + Unpin,
{
    sink.feed(header).await?;
    sink.send(body).await
}
