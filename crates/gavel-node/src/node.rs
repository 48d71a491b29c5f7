//! Node orchestration.
//!
//! The [`Node`] owns every component of a participant:
//! - Identity keypair (persisted under the data directory)
//! - Peer registry and TCP transport
//! - Auction ledger, journaled when a data directory is configured
//! - Coordination service answering RPC calls

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use gavel_market::AuctionLedger;
use gavel_p2p::{GossipBroadcaster, NodeKeypair, PeerId, PeerRegistry, RpcHandler, RpcServer, TcpTransport};
use gavel_persist::AppendLog;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{NodeConfig, JOURNAL_NAME};
use crate::error::NodeError;
use crate::service::CoordinationService;

/// A fully wired participant, ready to serve.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    keypair: NodeKeypair,
    transport: Arc<TcpTransport>,
    service: Arc<CoordinationService>,
}

impl Node {
    /// Builds every component from `config` without binding any socket.
    pub fn build(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let keypair = config.load_identity()?;
        let peer_id = keypair.peer_id();

        let ledger = match &config.data_dir {
            Some(dir) => AuctionLedger::with_journal(AppendLog::open(dir, JOURNAL_NAME)?),
            None => AuctionLedger::new(),
        };

        let registry = Arc::new(PeerRegistry::new(peer_id));
        let transport = Arc::new(TcpTransport::new(peer_id));
        let broadcaster = GossipBroadcaster::new(
            Arc::clone(&registry),
            transport.clone(),
            config.broadcast_config(),
        );
        let service = Arc::new(CoordinationService::new(
            config.name.clone(),
            registry,
            Arc::new(ledger),
            broadcaster,
            config.service_config(),
        ));

        Ok(Self {
            config,
            keypair,
            transport,
            service,
        })
    }

    /// The node's identity.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// The node's configuration.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The coordination service, for local operator actions.
    #[must_use]
    pub const fn service(&self) -> &Arc<CoordinationService> {
        &self.service
    }

    /// The outbound TCP transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<TcpTransport> {
        &self.transport
    }

    /// Binds the RPC server on the configured listen address and settles
    /// the address advertised in handshakes.
    pub async fn bind(&self) -> Result<RpcServer, NodeError> {
        let handler: Arc<dyn RpcHandler> = self.service.clone();
        let server = RpcServer::bind(&self.config.listen_addr.to_string(), handler).await?;
        let bound = server.local_addr()?;

        match self.config.advertise_addr_for(bound) {
            Some(addr) => {
                self.service.set_advertise_addr(addr);
                info!(%addr, "advertising address to peers");
            }
            None => warn!(
                %bound,
                "listening on a wildcard address without advertise_addr; peers cannot route back"
            ),
        }
        Ok(server)
    }

    /// Handshakes with every configured bootstrap peer concurrently.
    ///
    /// Returns how many acknowledged.
    pub async fn join_bootstrap(&self) -> usize {
        let joins = self.config.bootstrap.iter().map(|peer| {
            let route = peer.address.to_string();
            async move {
                self.service
                    .join(peer.public_key, Some(&route), peer.name.clone())
                    .await
            }
        });
        let joined = join_all(joins).await.into_iter().filter(|ok| *ok).count();
        if !self.config.bootstrap.is_empty() {
            info!(joined, configured = self.config.bootstrap.len(), "bootstrap complete");
        }
        joined
    }

    /// Serves until `shutdown` flips to `true`.
    ///
    /// Binds first so bootstrap peers can reach us back, then joins them.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
        let server = self.bind().await?;
        let addr: SocketAddr = server.local_addr()?;
        info!(
            name = %self.config.name,
            peer = %self.peer_id(),
            %addr,
            "gavel node started"
        );

        let serving = tokio::spawn(server.serve(shutdown));
        self.join_bootstrap().await;
        serving
            .await
            .map_err(|e| NodeError::Io(std::io::Error::other(e)))?;

        info!(name = %self.config.name, "gavel node stopped");
        Ok(())
    }
}
