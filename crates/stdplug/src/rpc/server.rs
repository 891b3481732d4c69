use super::codec::{MsgPackCodec, WireCodec};
use super::protocol::{RequestHeader, ResponseHeader, read_pair, write_pair};
use super::service::{CallResult, Dispatch, Registered, Service};
use crate::error::{RegisterError, RpcError};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use stdplug_core::{Conn, StdioConn};
use tokio::io::WriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

type SharedWriter<C, K> = Arc<Mutex<FramedWrite<WriteHalf<C>, <K as WireCodec>::Framing>>>;

/// RPC server bound to one stream.
///
/// Register services, then [`serve`](Provider::serve) until the peer hangs up.
pub struct Provider<C, K = MsgPackCodec> {
    conn: C,
    codec: K,
    services: HashMap<String, Arc<dyn Dispatch<K>>>,
}

impl<C: Conn> Provider<C, MsgPackCodec> {
    pub fn new(conn: C) -> Self {
        Self::with_codec(conn, MsgPackCodec)
    }
}

impl Provider<StdioConn, MsgPackCodec> {
    /// Serve over this process's stdin and stdout.
    ///
    /// This is what a plugin binary calls; its parent holds the client.
    pub fn stdio() -> Self {
        Self::new(StdioConn::stdio())
    }
}

impl<K: WireCodec> Provider<StdioConn, K> {
    pub fn stdio_with_codec(codec: K) -> Self {
        Self::with_codec(StdioConn::stdio(), codec)
    }
}

impl<C: Conn, K: WireCodec> Provider<C, K> {
    pub fn with_codec(conn: C, codec: K) -> Self {
        Self {
            conn,
            codec,
            services: HashMap::new(),
        }
    }

    /// Register `service` under [`Service::NAME`].
    pub fn register<S: Service>(&mut self, service: S) -> Result<(), RegisterError> {
        self.register_name(S::NAME, service)
    }

    /// Register `service` under `name` instead of its own name.
    pub fn register_name<S: Service>(&mut self, name: &str, service: S) -> Result<(), RegisterError> {
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if self.services.contains_key(name) {
            return Err(RegisterError::Duplicate(name.to_string()));
        }

        let registered = Registered::<S, K>::new(service);
        if registered.methods().is_empty() {
            return Err(RegisterError::NoMethods(name.to_string()));
        }

        debug!(service = name, methods = ?registered.methods().names().collect::<Vec<_>>(), "Registered service");
        self.services.insert(name.to_string(), Arc::new(registered));
        Ok(())
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Answer requests until the stream ends, then close it.
    ///
    /// Calls run concurrently; all of them finish before the stream is
    /// closed. A request for an unknown method or with an undecodable
    /// argument gets an error response and serving continues. An undecodable
    /// header ends serving with an error.
    pub async fn serve(self) -> Result<(), RpcError> {
        let Provider {
            conn,
            codec,
            services,
        } = self;

        let (read_half, write_half) = tokio::io::split(conn);
        let mut frames = FramedRead::new(read_half, codec.framing());
        let writer: SharedWriter<C, K> =
            Arc::new(Mutex::new(FramedWrite::new(write_half, codec.framing())));
        let mut calls = JoinSet::new();

        info!(services = services.len(), "Serving RPC requests");

        let result = loop {
            let (header, body) = match read_pair(&mut frames).await {
                Ok(Some(pair)) => pair,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let header: RequestHeader = match codec.decode(&header) {
                Ok(header) => header,
                Err(e) => break Err(RpcError::Codec(e)),
            };

            let call = resolve(&services, &header.service_method, &codec, body);
            let writer = writer.clone();
            let codec = codec.clone();
            calls.spawn(async move {
                let result = match call {
                    Ok(call) => call.await,
                    Err(message) => Err(message),
                };
                respond(&writer, &codec, header, result).await;
            });

            while let Some(done) = calls.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "RPC call task failed");
                }
            }
        };

        while let Some(done) = calls.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "RPC call task failed");
            }
        }

        // every call task has been joined, so this is the last handle
        let writer = match Arc::try_unwrap(writer) {
            Ok(writer) => writer.into_inner(),
            Err(_) => return Err(RpcError::Io(std::io::Error::other("response writer still in use"))),
        };
        let conn = frames.into_inner().unsplit(writer.into_inner());

        match (result, conn.close().await) {
            (Ok(()), close) => {
                info!("RPC stream ended, server stopped");
                close.map_err(RpcError::from)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close stream after serve error");
                Err(e)
            }
        }
    }
}

fn resolve<K: WireCodec>(
    services: &HashMap<String, Arc<dyn Dispatch<K>>>,
    service_method: &str,
    codec: &K,
    body: bytes::BytesMut,
) -> Result<BoxFuture<'static, CallResult>, String> {
    let Some((service, method)) = service_method.rsplit_once('.') else {
        return Err(format!("service/method request ill-formed: {service_method}"));
    };
    let Some(dispatch) = services.get(service) else {
        return Err(format!("can't find service {service_method}"));
    };
    dispatch
        .call(method, codec, body)
        .ok_or_else(|| format!("can't find method {service_method}"))
}

async fn respond<C: Conn, K: WireCodec>(
    writer: &SharedWriter<C, K>,
    codec: &K,
    request: RequestHeader,
    result: CallResult,
) {
    let (error, body) = match result {
        Ok(body) => (None, body),
        Err(message) => {
            debug!(method = %request.service_method, seq = request.seq, error = %message, "RPC call failed");
            match codec.encode(&()) {
                Ok(unit) => (Some(message), unit),
                Err(e) => {
                    warn!(error = %e, "Failed to encode empty response body");
                    return;
                }
            }
        }
    };

    let header = ResponseHeader {
        service_method: request.service_method,
        seq: request.seq,
        error,
    };
    let header = match codec.encode(&header) {
        Ok(header) => header,
        Err(e) => {
            warn!(error = %e, "Failed to encode response header");
            return;
        }
    };

    let mut sink = writer.lock().await;
    if let Err(e) = write_pair(&mut *sink, header, body).await {
        warn!(seq = request.seq, error = %e, "Failed to write RPC response");
    }
}
