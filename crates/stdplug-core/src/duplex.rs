//! Half-duplex combiner: one readable and one writable resource presented as a
//! single bidirectional stream with a coordinated close.

use crate::error::ChannelError;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::debug;

/// Read side of a [`Duplex`] that can be closed explicitly.
///
/// The default close releases the handle by dropping it.
#[async_trait]
pub trait CloseRead: AsyncRead + Unpin + Send + Sized {
    async fn close(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

/// Write side of a [`Duplex`] that can be closed explicitly.
///
/// The default close flushes and shuts the writer down before dropping it,
/// which is what delivers EOF to the peer.
#[async_trait]
pub trait CloseWrite: AsyncWrite + Unpin + Send + Sized {
    async fn close(mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

impl CloseRead for ChildStdout {}
impl CloseRead for tokio::io::Stdin {}
impl CloseRead for tokio::io::DuplexStream {}

impl CloseWrite for ChildStdin {}
impl CloseWrite for tokio::io::Stdout {}
impl CloseWrite for tokio::io::DuplexStream {}

/// A bidirectional byte stream with a single, consuming close.
///
/// RPC clients and servers are generic over this trait; both [`Duplex`] and
/// [`crate::SubprocessChannel`] implement it.
#[async_trait]
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send + Sized + 'static {
    async fn close(self) -> Result<(), ChannelError>;
}

/// Reads go to `reader`, writes go to `writer`.
#[derive(Debug)]
pub struct Duplex<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Duplex<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: CloseRead, W: CloseWrite> Duplex<R, W> {
    /// Close the reader, then the writer, whatever the reader returned.
    ///
    /// When both fail the writer's error wins; a failed write side is the one
    /// that can lose data.
    pub async fn close(self) -> io::Result<()> {
        let read_result = CloseRead::close(self.reader).await;
        let write_result = CloseWrite::close(self.writer).await;

        if let (Err(read_err), Err(_)) = (&read_result, &write_result) {
            debug!(error = %read_err, "read side close failed as well as write side");
        }

        write_result.and(read_result)
    }
}

#[async_trait]
impl<R, W> Conn for Duplex<R, W>
where
    R: CloseRead + 'static,
    W: CloseWrite + 'static,
{
    async fn close(self) -> Result<(), ChannelError> {
        Duplex::close(self).await.map_err(ChannelError::StreamClose)
    }
}

/// This process's own stdin and stdout.
pub type StdioConn = Duplex<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioConn {
    pub fn stdio() -> Self {
        Duplex::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for Duplex<R, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for Duplex<R, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.writer.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CloseProbe;
    use proptest::prelude::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_close_closes_both() {
        let reader = CloseProbe::new();
        let writer = CloseProbe::new();
        let duplex = Duplex::new(reader.clone(), writer.clone());

        duplex.close().await.unwrap();

        assert_eq!(reader.close_count(), 1);
        assert_eq!(writer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_read_error_passed_through() {
        let reader = CloseProbe::failing("read");
        let writer = CloseProbe::new();

        let err = Duplex::new(reader.clone(), writer.clone())
            .close()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "read");
        assert_eq!(reader.close_count(), 1);
        assert_eq!(writer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_write_error_passed_through() {
        let reader = CloseProbe::new();
        let writer = CloseProbe::failing("write");

        let err = Duplex::new(reader.clone(), writer.clone())
            .close()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "write");
        assert_eq!(reader.close_count(), 1);
        assert_eq!(writer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_write_error_wins_when_both_fail() {
        let reader = CloseProbe::failing("read");
        let writer = CloseProbe::failing("write");

        let err = Duplex::new(reader.clone(), writer.clone())
            .close()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "write");
        assert_eq!(reader.close_count(), 1);
        assert_eq!(writer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_conn_close_maps_to_stream_error() {
        let duplex = Duplex::new(CloseProbe::failing("read"), CloseProbe::new());
        let err = Conn::close(duplex).await.unwrap_err();
        assert!(matches!(err, ChannelError::StreamClose(_)));
    }

    #[tokio::test]
    async fn test_reads_and_writes_delegate() {
        let (mut peer_in, our_in) = tokio::io::duplex(64);
        let (our_out, mut peer_out) = tokio::io::duplex(64);
        let mut duplex = Duplex::new(our_in, our_out);

        peer_in.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        duplex.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        duplex.write_all(b"pong").await.unwrap();
        duplex.flush().await.unwrap();
        peer_out.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        duplex.close().await.unwrap();
        let mut rest = Vec::new();
        peer_out.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    proptest! {
        #[test]
        fn prop_close_reports_any_failure(read_fails in any::<bool>(), write_fails in any::<bool>()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let reader = if read_fails { CloseProbe::failing("read") } else { CloseProbe::new() };
            let writer = if write_fails { CloseProbe::failing("write") } else { CloseProbe::new() };

            let result = runtime.block_on(Duplex::new(reader.clone(), writer.clone()).close());

            prop_assert_eq!(result.is_err(), read_fails || write_fails);
            prop_assert_eq!(reader.close_count(), 1);
            prop_assert_eq!(writer.close_count(), 1);
            if write_fails {
                prop_assert_eq!(result.unwrap_err().to_string(), "write");
            }
        }
    }
}
