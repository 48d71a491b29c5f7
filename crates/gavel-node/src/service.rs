//! Coordination service.
//!
//! Routes inbound RPC methods to the peer registry and auction ledger, and
//! gossips every successful state change to the other known peers. Failures
//! are returned to the caller as error envelopes; gossip failures never are.

use std::net::SocketAddr;
use std::sync::Arc;

use gavel_market::{AuctionLedger, BidOutcome};
use gavel_p2p::{BoxFuture, GossipBroadcaster, PeerId, PeerRegistry, RpcHandler};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::proto::{
    self, AddPeerRequest, AuctionClosed, CloseAuctionRequest, CloseAuctionResponse,
    MakeBidRequest, MakeBidResponse, NewAuction, NewBid, OpenAuctionRequest, OpenAuctionResponse,
    RpcMethod,
};

/// What a node does with gossip it receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GossipPolicy {
    /// Log the event and acknowledge; the local ledger is untouched.
    #[default]
    Informational,
    /// Apply the event to the local ledger with the usual rules. Never re-gossiped.
    Merge,
}

/// Service behavior switches.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Handling of inbound gossip.
    pub gossip_policy: GossipPolicy,
    /// Broadcast on a background task and respond immediately.
    pub detach_broadcast: bool,
}

/// Request handler wiring the registry, ledger, and broadcaster together.
#[derive(Debug)]
pub struct CoordinationService {
    name: String,
    registry: Arc<PeerRegistry>,
    ledger: Arc<AuctionLedger>,
    broadcaster: GossipBroadcaster,
    config: ServiceConfig,
    /// Sent to peers in our `addPeer` handshake; known once the server is bound.
    advertise_addr: RwLock<Option<SocketAddr>>,
}

impl CoordinationService {
    /// Creates a service for the participant called `name`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        registry: Arc<PeerRegistry>,
        ledger: Arc<AuctionLedger>,
        broadcaster: GossipBroadcaster,
        config: ServiceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            ledger,
            broadcaster,
            config,
            advertise_addr: RwLock::new(None),
        }
    }

    /// Sets the address peers should use to reach this node.
    pub fn set_advertise_addr(&self, addr: SocketAddr) {
        *self.advertise_addr.write() = Some(addr);
    }

    /// The address sent in our `addPeer` handshake, if any.
    #[must_use]
    pub fn advertise_addr(&self) -> Option<SocketAddr> {
        *self.advertise_addr.read()
    }

    /// The local participant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local identity.
    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.registry.local_peer_id()
    }

    /// The peer registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// The auction ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<AuctionLedger> {
        &self.ledger
    }

    /// Handles one call and always produces a response body.
    pub async fn dispatch(&self, caller: Option<PeerId>, method: &str, payload: &[u8]) -> Vec<u8> {
        let result = match method.parse::<RpcMethod>() {
            Ok(method) => self.route(caller, method, payload).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            debug!(method, caller = ?caller, error = %e, "request failed");
            proto::error_body(&e)
        })
    }

    async fn route(
        &self,
        caller: Option<PeerId>,
        method: RpcMethod,
        payload: &[u8],
    ) -> Result<Vec<u8>, NodeError> {
        match method {
            RpcMethod::AddPeer => {
                self.add_peer(proto::decode(payload)?);
                Ok(proto::OK.to_vec())
            }
            RpcMethod::OpenAuction => {
                let response = self.open_auction(caller, &proto::decode(payload)?).await?;
                proto::encode(&response)
            }
            RpcMethod::MakeBid => {
                let response = self.make_bid(caller, &proto::decode(payload)?).await?;
                proto::encode(&response)
            }
            RpcMethod::CloseAuction => {
                let response = self.close_auction(caller, &proto::decode(payload)?).await?;
                proto::encode(&response)
            }
            RpcMethod::NewAuction => {
                self.on_new_auction(caller, &proto::decode(payload)?);
                Ok(proto::OK.to_vec())
            }
            RpcMethod::NewBid => {
                self.on_new_bid(caller, &proto::decode(payload)?);
                Ok(proto::OK.to_vec())
            }
            RpcMethod::AuctionClosed => {
                self.on_auction_closed(caller, &proto::decode(payload)?);
                Ok(proto::OK.to_vec())
            }
        }
    }

    /// Registers the peer described by an `addPeer` handshake.
    ///
    /// Returns `true` if the peer was not already known and reachable.
    pub fn add_peer(&self, request: AddPeerRequest) -> bool {
        let peer = request.public_key;
        if peer != self.local_peer_id() {
            if let Some(address) = &request.address {
                self.broadcaster.transport().remember_route(peer, address);
            }
        }
        self.registry.add(peer, request.name)
    }

    /// Opens an auction and gossips it to everyone but `caller`.
    pub async fn open_auction(
        &self,
        caller: Option<PeerId>,
        request: &OpenAuctionRequest,
    ) -> Result<OpenAuctionResponse, NodeError> {
        let opened = self
            .ledger
            .open(&request.item, request.price, &request.client_name)?;

        self.gossip(RpcMethod::NewAuction, &NewAuction::from(&opened), caller)
            .await;

        Ok(OpenAuctionResponse {
            status: format!("Auction for {} opened at {}", opened.item, opened.start_price),
            item: opened.item,
        })
    }

    /// Places a bid. Only a new highest bid is gossiped.
    pub async fn make_bid(
        &self,
        caller: Option<PeerId>,
        request: &MakeBidRequest,
    ) -> Result<MakeBidResponse, NodeError> {
        let outcome = self
            .ledger
            .bid(&request.item, &request.client_name, request.amount)?;

        match outcome {
            BidOutcome::Accepted(placed) => {
                self.gossip(RpcMethod::NewBid, &NewBid::from(&placed), caller)
                    .await;
                Ok(MakeBidResponse {
                    status: format!("Bid of {} on {} accepted", placed.amount, placed.item),
                    item: placed.item,
                    amount: placed.amount,
                    accepted: true,
                })
            }
            BidOutcome::NotHighest {
                item,
                amount,
                current_highest,
            } => Ok(MakeBidResponse {
                status: format!(
                    "Bid of {amount} on {item} is not above the current highest bid of {current_highest}"
                ),
                item,
                amount,
                accepted: false,
            }),
        }
    }

    /// Closes an auction and gossips the outcome.
    pub async fn close_auction(
        &self,
        caller: Option<PeerId>,
        request: &CloseAuctionRequest,
    ) -> Result<CloseAuctionResponse, NodeError> {
        let settled = self.ledger.close(&request.item, &request.client_name)?;

        self.gossip(RpcMethod::AuctionClosed, &AuctionClosed::from(&settled), caller)
            .await;

        Ok(CloseAuctionResponse::from(&settled))
    }

    /// Registers a bootstrap peer and sends it our own `addPeer` handshake.
    ///
    /// Returns `true` if the peer acknowledged. A failed handshake is logged and
    /// leaves the peer registered; the next broadcast prunes it if it is gone.
    pub async fn join(&self, peer: PeerId, route: Option<&str>, name: Option<String>) -> bool {
        let transport = self.broadcaster.transport();
        if let Some(route) = route {
            transport.remember_route(peer, route);
        }
        self.registry.add(peer, name);

        let handshake = AddPeerRequest {
            name: Some(self.name.clone()),
            public_key: self.local_peer_id(),
            address: self.advertise_addr().map(|addr| addr.to_string()),
        };
        let payload = match proto::encode(&handshake) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode handshake");
                return false;
            }
        };

        let call_timeout = self.broadcaster.config().call_timeout;
        let method = RpcMethod::AddPeer.as_str();
        match timeout(call_timeout, transport.call(peer, method, &payload)).await {
            Ok(Ok(body)) if proto::is_ok(&body) => {
                info!(peer = %peer, "joined peer");
                true
            }
            Ok(Ok(body)) => {
                warn!(peer = %peer, response = %String::from_utf8_lossy(&body), "unexpected handshake response");
                false
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "handshake failed");
                false
            }
            Err(_) => {
                warn!(peer = %peer, after = ?call_timeout, "handshake timed out");
                false
            }
        }
    }

    async fn gossip<T: Serialize>(&self, method: RpcMethod, event: &T, exclude: Option<PeerId>) {
        let payload = match proto::encode(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(method = %method, error = %e, "failed to encode gossip");
                return;
            }
        };

        if self.config.detach_broadcast {
            // Detached; the round logs its own summary.
            let handle = self
                .broadcaster
                .spawn_broadcast(method.as_str().to_string(), payload, exclude);
            drop(handle);
        } else {
            self.broadcaster
                .broadcast(method.as_str(), &payload, exclude)
                .await;
        }
    }

    fn on_new_auction(&self, caller: Option<PeerId>, event: &NewAuction) {
        info!(
            from = ?caller,
            creator = %event.client_name,
            item = %event.item,
            price = event.price,
            "gossip: new auction"
        );
        if self.config.gossip_policy == GossipPolicy::Merge {
            if let Err(e) = self.ledger.open(&event.item, event.price, &event.client_name) {
                debug!(item = %event.item, error = %e, "gossiped auction not merged");
            }
        }
    }

    fn on_new_bid(&self, caller: Option<PeerId>, event: &NewBid) {
        info!(
            from = ?caller,
            bidder = %event.client_name,
            item = %event.item,
            amount = event.amount,
            "gossip: new bid"
        );
        if self.config.gossip_policy == GossipPolicy::Merge {
            match self.ledger.bid(&event.item, &event.client_name, event.amount) {
                Ok(outcome) if !outcome.is_accepted() => {
                    debug!(item = %event.item, amount = event.amount, "gossiped bid below local highest");
                }
                Ok(_) => {}
                Err(e) => debug!(item = %event.item, error = %e, "gossiped bid not merged"),
            }
        }
    }

    fn on_auction_closed(&self, caller: Option<PeerId>, event: &AuctionClosed) {
        info!(
            from = ?caller,
            closed_by = %event.client_name,
            item = %event.item,
            winner = %event.winner,
            amount = event.amount,
            "gossip: auction closed"
        );
        if self.config.gossip_policy == GossipPolicy::Merge {
            if let Err(e) =
                self.ledger
                    .apply_remote_close(&event.item, &event.client_name, event.winning_bid())
            {
                debug!(item = %event.item, error = %e, "gossiped close not merged");
            }
        }
    }
}

impl RpcHandler for CoordinationService {
    fn handle<'a>(
        &'a self,
        caller: Option<PeerId>,
        method: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(self.dispatch(caller, method, payload))
    }
}
