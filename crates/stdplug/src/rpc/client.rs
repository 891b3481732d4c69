use super::codec::{MsgPackCodec, WireCodec};
use super::protocol::{RequestHeader, ResponseHeader, read_pair, write_pair};
use crate::error::RpcError;
use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use stdplug_core::{Conn, StdioConn};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

type Reply = Result<BytesMut, RpcError>;
type Replies<C, K> = FramedRead<ReadHalf<C>, <K as WireCodec>::Framing>;

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

impl Pending {
    fn shut_down(&mut self) {
        self.closed = true;
        for (_, call) in self.calls.drain() {
            let _ = call.send(Err(RpcError::Shutdown));
        }
    }
}

/// RPC client bound to one stream.
///
/// Calls may be issued concurrently from several tasks; replies are matched
/// to calls by sequence number. Must be created inside a tokio runtime.
/// Dropping the client without [`close`](RpcClient::close) stops its reader
/// and releases the stream without the graceful close.
pub struct RpcClient<C, K: WireCodec = MsgPackCodec> {
    codec: K,
    writer: Mutex<FramedWrite<WriteHalf<C>, K::Framing>>,
    pending: Arc<StdMutex<Pending>>,
    next_seq: AtomicU64,
    cancel: DropGuard,
    reader: JoinHandle<Replies<C, K>>,
}

impl<C: Conn> RpcClient<C, MsgPackCodec> {
    pub fn new(conn: C) -> Self {
        Self::with_codec(conn, MsgPackCodec)
    }
}

impl RpcClient<StdioConn, MsgPackCodec> {
    /// Call the parent process over this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(StdioConn::stdio())
    }
}

impl<K: WireCodec> RpcClient<StdioConn, K> {
    pub fn stdio_with_codec(codec: K) -> Self {
        Self::with_codec(StdioConn::stdio(), codec)
    }
}

impl<C: Conn, K: WireCodec> RpcClient<C, K> {
    pub fn with_codec(conn: C, codec: K) -> Self {
        let (read_half, write_half) = tokio::io::split(conn);
        let pending = Arc::new(StdMutex::new(Pending::default()));
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_replies(
            FramedRead::new(read_half, codec.framing()),
            codec.clone(),
            pending.clone(),
            cancel.clone(),
        ));

        Self {
            writer: Mutex::new(FramedWrite::new(write_half, codec.framing())),
            codec,
            pending,
            next_seq: AtomicU64::new(0),
            cancel: cancel.drop_guard(),
            reader,
        }
    }

    /// Invoke `service_method` (`"Service.Method"`) and wait for its reply.
    pub async fn call<A, R>(&self, service_method: &str, arg: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let header = self.codec.encode(&RequestHeader {
            service_method: service_method.to_string(),
            seq,
        })?;
        let body = self.codec.encode(arg)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(RpcError::Shutdown);
            }
            pending.calls.insert(seq, reply_tx);
        }

        let sent = {
            let mut writer = self.writer.lock().await;
            write_pair(&mut *writer, header, body).await
        };
        if let Err(e) = sent {
            self.lock_pending().calls.remove(&seq);
            return Err(RpcError::Io(e));
        }

        let reply = reply_rx.await.map_err(|_| RpcError::Shutdown)??;
        Ok(self.codec.decode(&reply)?)
    }

    /// Stop reading replies and close the stream.
    ///
    /// Calls still waiting fail with [`RpcError::Shutdown`]. For a spawned
    /// plugin this runs the child's shutdown sequence.
    pub async fn close(self) -> Result<(), RpcError> {
        self.cancel.disarm().cancel();
        let replies = self
            .reader
            .await
            .map_err(|e| RpcError::ReaderFailed(e.to_string()))?;

        let conn = replies.into_inner().unsplit(self.writer.into_inner().into_inner());
        conn.close().await?;
        info!("RPC client closed");
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn read_replies<R, K>(
    mut frames: FramedRead<R, K::Framing>,
    codec: K,
    pending: Arc<StdMutex<Pending>>,
    cancel: CancellationToken,
) -> FramedRead<R, K::Framing>
where
    R: tokio::io::AsyncRead + Unpin,
    K: WireCodec,
{
    loop {
        let pair = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pair = read_pair(&mut frames) => pair,
        };

        let (header, body) = match pair {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                debug!("RPC stream ended");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read RPC response");
                break;
            }
        };
        let header: ResponseHeader = match codec.decode(&header) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "Invalid RPC response header");
                break;
            }
        };

        let call = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .remove(&header.seq);
        let Some(call) = call else {
            debug!(seq = header.seq, "Dropping response for unknown call");
            continue;
        };

        let reply = match header.error {
            Some(message) => Err(RpcError::Remote(message)),
            None => Ok(body),
        };
        let _ = call.send(reply);
    }

    pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .shut_down();
    frames
}
