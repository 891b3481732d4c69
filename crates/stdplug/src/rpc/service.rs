//! Typed service registration.
//!
//! A service is any `Send + Sync` value whose methods are listed once, by
//! name, in [`Service::methods`]. Each method takes one argument and returns
//! one reply or an error, which is what the request/response frames carry.

use super::codec::WireCodec;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Encoded reply, or the error message sent back to the caller
pub(crate) type CallResult = Result<Bytes, String>;

type Handler<S, K> = Box<dyn Fn(Arc<S>, &K, BytesMut) -> BoxFuture<'static, CallResult> + Send + Sync>;

pub trait Service: Send + Sync + Sized + 'static {
    /// Name requests address the service by, as in `"Greeter.SayHi"`
    const NAME: &'static str;

    fn methods<K: WireCodec>(methods: &mut Methods<Self, K>);
}

/// Method table of one service
pub struct Methods<S, K> {
    handlers: HashMap<&'static str, Handler<S, K>>,
}

impl<S: Send + Sync + 'static, K: WireCodec> Methods<S, K> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Expose `f` as `name`. A later registration under the same name replaces
    /// the earlier one.
    pub fn add<A, R, F, Fut>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = move |service: Arc<S>, codec: &K, body: BytesMut| -> BoxFuture<'static, CallResult> {
            let arg = match codec.decode::<A>(&body) {
                Ok(arg) => arg,
                Err(e) => {
                    let message = format!("invalid argument for {name}: {e}");
                    return futures::future::ready(Err(message)).boxed();
                }
            };

            let codec = codec.clone();
            let reply = f(service, arg);
            async move {
                let reply = reply.await.map_err(|e| e.to_string())?;
                codec.encode(&reply).map_err(|e| e.to_string())
            }
            .boxed()
        };

        self.handlers.insert(name, Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

/// A registered service with its method table, type-erased for the server.
pub(crate) trait Dispatch<K>: Send + Sync {
    /// Start `method`, or `None` if the service has no such method.
    fn call(&self, method: &str, codec: &K, body: BytesMut) -> Option<BoxFuture<'static, CallResult>>;
}

pub(crate) struct Registered<S, K> {
    service: Arc<S>,
    methods: Methods<S, K>,
}

impl<S: Service, K: WireCodec> Registered<S, K> {
    pub(crate) fn new(service: S) -> Self {
        let mut methods = Methods::new();
        S::methods(&mut methods);
        Self {
            service: Arc::new(service),
            methods,
        }
    }

    pub(crate) fn methods(&self) -> &Methods<S, K> {
        &self.methods
    }
}

impl<S: Service, K: WireCodec> Dispatch<K> for Registered<S, K> {
    fn call(&self, method: &str, codec: &K, body: BytesMut) -> Option<BoxFuture<'static, CallResult>> {
        let handler = self.methods.handlers.get(method)?;
        Some(handler(self.service.clone(), codec, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::codec::JsonCodec;

    struct Counter {
        step: i64,
    }

    impl Service for Counter {
        const NAME: &'static str = "Counter";

        fn methods<K: WireCodec>(m: &mut Methods<Self, K>) {
            m.add("Add", |svc: Arc<Self>, n: i64| async move { Ok(n + svc.step) })
                .add("Fail", |_svc: Arc<Self>, _: ()| async move {
                    Err::<(), _>(anyhow::anyhow!("always fails"))
                });
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let registered = Registered::<_, JsonCodec>::new(Counter { step: 2 });
        assert_eq!(registered.methods().len(), 2);

        let reply = registered
            .call("Add", &JsonCodec, BytesMut::from(&b"40"[..]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(&reply[..], b"42");
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let registered = Registered::<_, JsonCodec>::new(Counter { step: 1 });

        assert!(registered.call("Missing", &JsonCodec, BytesMut::new()).is_none());

        let err = registered
            .call("Add", &JsonCodec, BytesMut::from(&b"\"nope\""[..]))
            .unwrap()
            .await
            .unwrap_err();
        assert!(err.starts_with("invalid argument for Add"));

        let err = registered
            .call("Fail", &JsonCodec, BytesMut::from(&b"null"[..]))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err, "always fails");
    }
}
