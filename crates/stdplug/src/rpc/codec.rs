//! Wire codecs: how frames are delimited and how values become frame bytes.

use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Framing plus serialization used on an RPC stream.
///
/// Chosen when a client or server is constructed; both ends of a stream must
/// agree on it.
pub trait WireCodec: Clone + Send + Sync + 'static {
    type Framing: Decoder<Item = BytesMut, Error = io::Error>
        + Encoder<Bytes, Error = io::Error>
        + Send
        + Sync
        + Unpin
        + 'static;

    fn framing(&self) -> Self::Framing;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError>;

    fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, CodecError>;
}

/// MessagePack bodies in length-prefixed frames. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl WireCodec for MsgPackCodec {
    type Framing = LengthDelimitedCodec;

    fn framing(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec()
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        rmp_serde::to_vec_named(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(frame).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// One JSON document per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    type Framing = JsonLines;

    fn framing(&self) -> JsonLines {
        JsonLines::default()
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(frame).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Newline-delimited frames. Compact JSON never contains a raw newline.
#[derive(Debug, Default)]
pub struct JsonLines {
    // bytes already searched for a newline
    scanned: usize,
}

impl Decoder for JsonLines {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        let start = self.scanned.min(src.len());

        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let mut line = src.split_to(start + offset + 1);
                line.truncate(line.len() - 1);
                self.scanned = 0;
                Ok(Some(line))
            }
            None if src.len() > MAX_FRAME_LEN => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "line exceeds maximum frame length",
            )),
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            // unterminated last line
            Ok(Some(src.split()))
        }
    }
}

impl Encoder<Bytes> for JsonLines {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(item.len() + 1);
        dst.put(item);
        dst.put_u8(b'\n');
        Ok(())
    }
}
