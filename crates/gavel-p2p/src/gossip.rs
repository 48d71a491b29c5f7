//! Best-effort gossip fan-out.
//!
//! A broadcast snapshots the registry, calls every reachable peer except the
//! excluded origin concurrently, and prunes peers whose channel closed. One
//! peer's failure never affects delivery to the others, and nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::protocol::PeerId;
use crate::registry::PeerRegistry;
use crate::transport::RpcTransport;

/// Configuration for gossip broadcast behavior.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Upper bound on each outbound call; a timeout counts as a closed channel.
    pub call_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl BroadcastConfig {
    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Result of one broadcast round.
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    /// Identifier correlating the round's log lines.
    pub round: Uuid,
    /// Method that was gossiped.
    pub method: String,
    /// Peers that acknowledged.
    pub delivered: Vec<PeerId>,
    /// Peers removed from the registry because their channel closed.
    pub pruned: Vec<PeerId>,
    /// Peers that failed for another reason and were kept.
    pub failed: Vec<PeerId>,
}

impl BroadcastReport {
    /// Number of peers the round tried to reach.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.pruned.len() + self.failed.len()
    }
}

/// Gossip broadcaster fanning events out to every registered peer.
#[derive(Clone)]
pub struct GossipBroadcaster {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn RpcTransport>,
    config: BroadcastConfig,
}

impl std::fmt::Debug for GossipBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipBroadcaster")
            .field("local_peer_id", &self.registry.local_peer_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GossipBroadcaster {
    /// Creates a new gossip broadcaster.
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn RpcTransport>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    /// Returns the current config.
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Returns the registry this broadcaster reads from.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Returns the transport outbound calls go through.
    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Sends `method(payload)` to every reachable peer except `exclude`.
    ///
    /// Never fails: per-peer outcomes are reported, logged, and applied to the
    /// registry.
    pub async fn broadcast(
        &self,
        method: &str,
        payload: &[u8],
        exclude: Option<PeerId>,
    ) -> BroadcastReport {
        let round = Uuid::new_v4();
        let targets: Vec<PeerId> = self
            .registry
            .active_peers()
            .into_iter()
            .filter(|peer| Some(*peer) != exclude)
            .collect();

        let mut report = BroadcastReport {
            round,
            method: method.to_string(),
            delivered: Vec::new(),
            pruned: Vec::new(),
            failed: Vec::new(),
        };
        if targets.is_empty() {
            debug!(%round, method, "no peers to gossip to");
            return report;
        }

        let call_timeout = self.config.call_timeout;
        let calls = targets.iter().map(|&peer| async move {
            let outcome = match timeout(call_timeout, self.transport.call(peer, method, payload)).await
            {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(TransportError::Timeout {
                    peer,
                    after: call_timeout,
                }),
            };
            (peer, outcome)
        });

        for (peer, outcome) in join_all(calls).await {
            match outcome {
                Ok(()) => report.delivered.push(peer),
                Err(e) if e.is_channel_closed() => {
                    debug!(%round, peer = %peer, error = %e, "pruning unreachable peer");
                    self.registry.mark_unreachable(&peer);
                    report.pruned.push(peer);
                }
                Err(e) => {
                    warn!(%round, peer = %peer, error = %e, "gossip delivery failed");
                    report.failed.push(peer);
                }
            }
        }

        info!(
            %round,
            method,
            delivered = report.delivered.len(),
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            "gossip round complete"
        );
        report
    }

    /// Runs [`GossipBroadcaster::broadcast`] on a background task.
    pub fn spawn_broadcast(
        &self,
        method: String,
        payload: Vec<u8>,
        exclude: Option<PeerId>,
    ) -> JoinHandle<BroadcastReport> {
        let broadcaster = self.clone();
        tokio::spawn(async move { broadcaster.broadcast(&method, &payload, exclude).await })
    }
}
