//! Request/response transport abstraction.
//!
//! A node talks to its peers through exactly one primitive,
//! `call(peer, method, payload) -> response | failure`, and answers calls
//! through an [`RpcHandler`]. [`MemoryNetwork`] wires handlers together
//! in-process.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::TransportError;
use crate::protocol::PeerId;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound side: issues calls to remote peers.
pub trait RpcTransport: Send + Sync {
    /// Calls `method` on `peer` and waits for its response bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] classifying why the call failed.
    fn call<'a>(
        &'a self,
        peer: PeerId,
        method: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>>;

    /// Records how to reach `peer`, for transports that keep an address book.
    fn remember_route(&self, _peer: PeerId, _route: &str) {}
}

/// Inbound side: answers calls made by remote peers.
pub trait RpcHandler: Send + Sync {
    /// Handles one call. `caller` is the remote identity, when the transport knows it.
    fn handle<'a>(
        &'a self,
        caller: Option<PeerId>,
        method: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Vec<u8>>;
}

/// In-process network connecting handlers by peer ID.
///
/// Handlers are held weakly, so dropping a node detaches it.
#[derive(Default)]
pub struct MemoryNetwork {
    handlers: RwLock<HashMap<PeerId, Weak<dyn RpcHandler>>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("nodes", &self.handlers.read().len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `handler` answer calls addressed to `peer`.
    pub fn attach(&self, peer: PeerId, handler: &Arc<dyn RpcHandler>) {
        self.handlers.write().insert(peer, Arc::downgrade(handler));
    }

    /// Disconnects `peer`; later calls to it fail with a closed channel.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        self.handlers.write().remove(peer).is_some()
    }

    /// Returns a transport that calls out of this network as `local`.
    #[must_use]
    pub fn transport(self: &Arc<Self>, local: PeerId) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            local,
        }
    }

    fn handler(&self, peer: &PeerId) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.read().get(peer).and_then(Weak::upgrade)
    }
}

/// A node's view of a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    local: PeerId,
}

impl RpcTransport for MemoryTransport {
    fn call<'a>(
        &'a self,
        peer: PeerId,
        method: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            let handler = self
                .network
                .handler(&peer)
                .ok_or(TransportError::ChannelClosed { peer })?;
            trace!(from = %self.local.short(), to = %peer.short(), method, "memory call");
            Ok(handler.handle(Some(self.local), method, payload).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeKeypair;

    struct Echo;

    impl RpcHandler for Echo {
        fn handle<'a>(
            &'a self,
            caller: Option<PeerId>,
            method: &'a str,
            payload: &'a [u8],
        ) -> BoxFuture<'a, Vec<u8>> {
            Box::pin(async move {
                let caller = caller.map(|c| c.to_hex()).unwrap_or_default();
                format!("{caller}:{method}:{}", String::from_utf8_lossy(payload)).into_bytes()
            })
        }
    }

    #[tokio::test]
    async fn memory_call_reaches_handler_with_caller() {
        let network = MemoryNetwork::new();
        let a = NodeKeypair::generate().peer_id();
        let b = NodeKeypair::generate().peer_id();
        let echo: Arc<dyn RpcHandler> = Arc::new(Echo);
        network.attach(b, &echo);

        let response = network.transport(a).call(b, "ping", b"hi").await.unwrap();
        assert_eq!(String::from_utf8(response).unwrap(), format!("{a}:ping:hi"));
    }

    #[tokio::test]
    async fn detached_peer_reports_channel_closed() {
        let network = MemoryNetwork::new();
        let a = NodeKeypair::generate().peer_id();
        let b = NodeKeypair::generate().peer_id();
        let echo: Arc<dyn RpcHandler> = Arc::new(Echo);
        network.attach(b, &echo);
        assert!(network.disconnect(&b));

        let err = network.transport(a).call(b, "ping", b"").await.unwrap_err();
        assert_eq!(err, TransportError::ChannelClosed { peer: b });
    }

    #[tokio::test]
    async fn dropped_handler_reports_channel_closed() {
        let network = MemoryNetwork::new();
        let a = NodeKeypair::generate().peer_id();
        let b = NodeKeypair::generate().peer_id();
        {
            let echo: Arc<dyn RpcHandler> = Arc::new(Echo);
            network.attach(b, &echo);
        }

        let err = network.transport(a).call(b, "ping", b"").await.unwrap_err();
        assert!(err.is_channel_closed());
    }
}
