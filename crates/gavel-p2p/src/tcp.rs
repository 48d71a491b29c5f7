//! TCP implementation of the RPC transport.
//!
//! Every message is a length-delimited frame. A request is two frames, a JSON
//! [`RequestHeader`] followed by the raw payload; the response is one frame.
//! A connection may carry any number of sequential requests.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use crate::error::{P2pError, TransportError};
use crate::protocol::PeerId;
use crate::transport::{BoxFuture, RpcHandler, RpcTransport};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on a whole request, connect included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest pause between retries after failed accepts.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// First frame of every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Method name.
    pub method: String,
    /// Caller identity; absent for anonymous clients such as the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Outbound TCP transport with an address book keyed by peer ID.
#[derive(Debug)]
pub struct TcpTransport {
    local: Option<PeerId>,
    routes: RwLock<HashMap<PeerId, SocketAddr>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpTransport {
    /// Creates a transport that identifies itself as `local`.
    #[must_use]
    pub fn new(local: PeerId) -> Self {
        Self {
            local: Some(local),
            routes: RwLock::new(HashMap::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Creates a transport that sends no caller identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            local: None,
            routes: RwLock::new(HashMap::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the bound on a whole request: connect, send, and wait for the response.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Records the address `peer` listens on.
    pub fn add_route(&self, peer: PeerId, addr: SocketAddr) {
        debug!(peer = %peer.short(), %addr, "route added");
        self.routes.write().insert(peer, addr);
    }

    /// Address recorded for `peer`.
    #[must_use]
    pub fn route(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.routes.read().get(peer).copied()
    }

    /// Calls `method` on whatever node listens at `addr`.
    pub async fn request(
        &self,
        addr: SocketAddr,
        method: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, P2pError> {
        let Ok(result) = timeout(self.request_timeout, self.exchange(addr, method, payload)).await
        else {
            return Err(P2pError::Connection(format!(
                "{addr}: no response within {:?}",
                self.request_timeout
            )));
        };
        match result {
            Ok(response) => Ok(response),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(P2pError::Connection(format!("{addr}: {e}")))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(P2pError::Protocol(e.to_string())),
            Err(e) => Err(P2pError::Io(e)),
        }
    }

    async fn exchange(&self, addr: SocketAddr, method: &str, payload: &[u8]) -> io::Result<Vec<u8>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, codec());

        let header = RequestHeader {
            method: method.to_string(),
            from: self.local,
        };
        let header = serde_json::to_vec(&header).map_err(io::Error::other)?;
        framed.send(Bytes::from(header)).await?;
        framed.send(Bytes::copy_from_slice(payload)).await?;

        match framed.next().await {
            Some(frame) => Ok(frame?.to_vec()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            )),
        }
    }
}

/// Maps an I/O failure onto the transport's closed/other classification.
///
/// `connect_timeout` is reported as the wait when the connect itself timed out.
fn classify(peer: PeerId, err: &io::Error, connect_timeout: Duration) -> TransportError {
    use io::ErrorKind::{
        AddrNotAvailable, BrokenPipe, ConnectionAborted, ConnectionRefused, ConnectionReset,
        HostUnreachable, NetworkUnreachable, NotConnected, TimedOut, UnexpectedEof,
    };

    match err.kind() {
        TimedOut => TransportError::Timeout {
            peer,
            after: connect_timeout,
        },
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | UnexpectedEof | AddrNotAvailable | HostUnreachable | NetworkUnreachable => {
            TransportError::ChannelClosed { peer }
        }
        _ => TransportError::Failed {
            peer,
            reason: err.to_string(),
        },
    }
}

impl RpcTransport for TcpTransport {
    fn call<'a>(
        &'a self,
        peer: PeerId,
        method: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        Box::pin(async move {
            let Some(addr) = self.route(&peer) else {
                debug!(peer = %peer.short(), "no route to peer");
                return Err(TransportError::ChannelClosed { peer });
            };
            match timeout(self.request_timeout, self.exchange(addr, method, payload)).await {
                Ok(result) => result.map_err(|e| classify(peer, &e, self.connect_timeout)),
                Err(_) => Err(TransportError::Timeout {
                    peer,
                    after: self.request_timeout,
                }),
            }
        })
    }

    fn remember_route(&self, peer: PeerId, route: &str) {
        match route.parse::<SocketAddr>() {
            Ok(addr) => self.add_route(peer, addr),
            Err(e) => warn!(peer = %peer.short(), route, error = %e, "ignoring unparseable route"),
        }
    }
}

/// Accepts TCP connections and dispatches requests to an [`RpcHandler`].
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl RpcServer {
    /// Binds the listening socket.
    pub async fn bind(addr: &str, handler: Arc<dyn RpcHandler>) -> Result<Self, P2pError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    /// The bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, P2pError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` flips to `true` or its sender drops.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let addr = self.listener.local_addr().ok();
        info!(addr = ?addr, "rpc server listening");

        let mut failed_accepts = 0u32;
        loop {
            tokio::select! {
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, remote)) => {
                            failed_accepts = 0;
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler).await {
                                    debug!(remote = %remote, error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            failed_accepts = failed_accepts.saturating_add(1);
                            let pause = accept_backoff(failed_accepts);
                            error!(error = %e, failures = failed_accepts, ?pause, "accept failed");
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("rpc server shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Pause before the next accept after `failures` consecutive errors
/// (10 ms, doubling, capped at one second).
fn accept_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(7);
    Duration::from_millis(10 << exp).min(MAX_ACCEPT_BACKOFF)
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn RpcHandler>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, codec());

    while let Some(header) = framed.next().await {
        let header: RequestHeader = serde_json::from_slice(&header?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let Some(payload) = framed.next().await else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request header without payload",
            ));
        };
        let payload = payload?;

        let response = handler
            .handle(header.from, &header.method, &payload)
            .await;
        framed.send(Bytes::from(response)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeKeypair;
    use test_case::test_case;

    struct Echo;

    impl RpcHandler for Echo {
        fn handle<'a>(
            &'a self,
            caller: Option<PeerId>,
            method: &'a str,
            payload: &'a [u8],
        ) -> BoxFuture<'a, Vec<u8>> {
            Box::pin(async move {
                let caller = caller.map(|c| c.short()).unwrap_or_else(|| "anon".to_string());
                format!("{caller}:{method}:{}", String::from_utf8_lossy(payload)).into_bytes()
            })
        }
    }

    async fn start_echo() -> (SocketAddr, watch::Sender<bool>) {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(Echo)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.serve(rx));
        (addr, tx)
    }

    async fn unused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn header_omits_missing_caller() {
        let header = RequestHeader {
            method: "openAuction".to_string(),
            from: None,
        };
        assert_eq!(
            serde_json::to_string(&header).unwrap(),
            r#"{"method":"openAuction"}"#
        );
    }

    #[tokio::test]
    async fn call_round_trips_through_server() {
        let (addr, _shutdown) = start_echo().await;
        let local = NodeKeypair::generate().peer_id();
        let remote = NodeKeypair::generate().peer_id();
        let transport = TcpTransport::new(local);
        transport.add_route(remote, addr);

        let response = transport.call(remote, "newBid", b"{}").await.unwrap();
        assert_eq!(
            String::from_utf8(response).unwrap(),
            format!("{}:newBid:{{}}", local.short())
        );
    }

    #[tokio::test]
    async fn anonymous_request_by_address() {
        let (addr, _shutdown) = start_echo().await;
        let transport = TcpTransport::anonymous();

        let response = transport.request(addr, "closeAuction", b"x").await.unwrap();
        assert_eq!(response, b"anon:closeAuction:x".to_vec());
    }

    #[tokio::test]
    async fn empty_payload_is_delivered() {
        let (addr, _shutdown) = start_echo().await;
        let response = TcpTransport::anonymous()
            .request(addr, "ping", b"")
            .await
            .unwrap();
        assert_eq!(response, b"anon:ping:".to_vec());
    }

    #[tokio::test]
    async fn refused_connection_is_channel_closed() {
        let addr = unused_addr().await;
        let remote = NodeKeypair::generate().peer_id();
        let transport = TcpTransport::new(NodeKeypair::generate().peer_id());
        transport.add_route(remote, addr);

        let err = transport.call(remote, "newAuction", b"{}").await.unwrap_err();
        assert_eq!(err, TransportError::ChannelClosed { peer: remote });
    }

    #[tokio::test]
    async fn unknown_route_is_channel_closed() {
        let remote = NodeKeypair::generate().peer_id();
        let transport = TcpTransport::new(NodeKeypair::generate().peer_id());

        let err = transport.call(remote, "newAuction", b"{}").await.unwrap_err();
        assert!(err.is_channel_closed());
    }

    #[tokio::test]
    async fn stopped_server_refuses_new_calls() {
        let (addr, shutdown) = start_echo().await;
        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let remote = NodeKeypair::generate().peer_id();
        let transport = TcpTransport::new(NodeKeypair::generate().peer_id());
        transport.add_route(remote, addr);
        let err = transport.call(remote, "newBid", b"{}").await.unwrap_err();
        assert!(err.is_channel_closed());
    }

    #[test]
    fn remember_route_parses_socket_addr() {
        let transport = TcpTransport::anonymous();
        let peer = NodeKeypair::generate().peer_id();

        transport.remember_route(peer, "not an address");
        assert!(transport.route(&peer).is_none());

        transport.remember_route(peer, "127.0.0.1:7400");
        assert_eq!(transport.route(&peer), Some("127.0.0.1:7400".parse().unwrap()));
    }

    #[test_case(io::ErrorKind::ConnectionRefused => true)]
    #[test_case(io::ErrorKind::ConnectionReset => true)]
    #[test_case(io::ErrorKind::UnexpectedEof => true)]
    #[test_case(io::ErrorKind::BrokenPipe => true)]
    #[test_case(io::ErrorKind::TimedOut => true)]
    #[test_case(io::ErrorKind::InvalidData => false)]
    #[test_case(io::ErrorKind::PermissionDenied => false)]
    fn io_error_classification(kind: io::ErrorKind) -> bool {
        let peer = PeerId::from_bytes([3u8; 32]);
        classify(peer, &io::Error::from(kind), DEFAULT_CONNECT_TIMEOUT).is_channel_closed()
    }

    #[test]
    fn connect_timeout_is_reported_as_timeout() {
        let peer = PeerId::from_bytes([4u8; 32]);
        let err = classify(
            peer,
            &io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            Duration::from_millis(300),
        );
        assert_eq!(
            err,
            TransportError::Timeout {
                peer,
                after: Duration::from_millis(300)
            }
        );
    }

    /// Accepts connections and holds them open without ever answering.
    async fn start_silent() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    #[tokio::test]
    async fn silent_server_request_times_out() {
        let addr = start_silent().await;
        let transport =
            TcpTransport::anonymous().with_request_timeout(Duration::from_millis(200));

        let result = timeout(
            Duration::from_secs(5),
            transport.request(addr, "openAuction", b"{}"),
        )
        .await
        .expect("request should give up on its own");
        assert!(matches!(result, Err(P2pError::Connection(_))));
    }

    #[tokio::test]
    async fn silent_peer_call_times_out_and_counts_as_closed() {
        let addr = start_silent().await;
        let remote = NodeKeypair::generate().peer_id();
        let transport = TcpTransport::new(NodeKeypair::generate().peer_id())
            .with_request_timeout(Duration::from_millis(200));
        transport.add_route(remote, addr);

        let err = timeout(Duration::from_secs(5), transport.call(remote, "newBid", b"{}"))
            .await
            .expect("call should give up on its own")
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                peer: remote,
                after: Duration::from_millis(200)
            }
        );
        assert!(err.is_channel_closed());
    }

    #[test_case(1 => Duration::from_millis(10))]
    #[test_case(2 => Duration::from_millis(20))]
    #[test_case(5 => Duration::from_millis(160))]
    #[test_case(8 => Duration::from_secs(1))]
    #[test_case(u32::MAX => Duration::from_secs(1))]
    fn accept_backoff_grows_and_caps(failures: u32) -> Duration {
        accept_backoff(failures)
    }
}
