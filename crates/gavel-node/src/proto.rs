//! Wire protocol between gavel nodes.
//!
//! Payloads are JSON objects with camelCase field names. `addPeer` and the
//! gossip methods answer with the bare text `OK`; the auction methods answer
//! with a `{status, ...}` object, or `{error, code}` on failure. Callers check
//! for the `error` key before treating a response as success.

use std::fmt;
use std::str::FromStr;

use gavel_market::{AuctionOpened, AuctionSettled, BidPlaced};
use gavel_p2p::PeerId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, RemoteError};

/// Acknowledgement body for `addPeer` and gossip.
pub const OK: &[u8] = b"OK";

/// Winner announced when an auction closes without bids.
pub const NO_WINNER: &str = "No Winner";

/// Methods a node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Peer handshake.
    AddPeer,
    /// Open an auction on the receiving node.
    OpenAuction,
    /// Bid on an auction held by the receiving node.
    MakeBid,
    /// Close an auction held by the receiving node.
    CloseAuction,
    /// Gossip: an auction was opened somewhere.
    NewAuction,
    /// Gossip: a new highest bid was placed somewhere.
    NewBid,
    /// Gossip: an auction was closed somewhere.
    AuctionClosed,
}

impl RpcMethod {
    /// Every method, in protocol order.
    pub const ALL: [Self; 7] = [
        Self::AddPeer,
        Self::OpenAuction,
        Self::MakeBid,
        Self::CloseAuction,
        Self::NewAuction,
        Self::NewBid,
        Self::AuctionClosed,
    ];

    /// Name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddPeer => "addPeer",
            Self::OpenAuction => "openAuction",
            Self::MakeBid => "makeBid",
            Self::CloseAuction => "closeAuction",
            Self::NewAuction => "newAuction",
            Self::NewBid => "newBid",
            Self::AuctionClosed => "auctionClosed",
        }
    }

    /// True for the inbound notifications produced by gossip.
    #[must_use]
    pub const fn is_gossip(self) -> bool {
        matches!(self, Self::NewAuction | Self::NewBid | Self::AuctionClosed)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcMethod {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| NodeError::UnknownMethod(s.to_string()))
    }
}

/// `addPeer` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPeerRequest {
    /// Display name of the joining participant.
    #[serde(default, alias = "clientName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identity of the joining participant.
    #[serde(alias = "clientPublicKey")]
    pub public_key: PeerId,
    /// Where the participant listens, for transports that route by address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// `openAuction` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAuctionRequest {
    /// Participant opening the auction.
    pub client_name: String,
    /// Item name.
    pub item: String,
    /// Asking price.
    pub price: f64,
}

/// `makeBid` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeBidRequest {
    /// Bidding participant.
    pub client_name: String,
    /// Item name.
    pub item: String,
    /// Offered amount.
    pub amount: f64,
}

/// `closeAuction` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAuctionRequest {
    /// Participant asking to close; must be the creator.
    pub client_name: String,
    /// Item name.
    pub item: String,
}

/// `newAuction` gossip payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuction {
    /// Creator of the auction.
    pub client_name: String,
    /// Item name.
    pub item: String,
    /// Asking price.
    pub price: f64,
}

impl From<&AuctionOpened> for NewAuction {
    fn from(event: &AuctionOpened) -> Self {
        Self {
            client_name: event.creator.clone(),
            item: event.item.clone(),
            price: event.start_price,
        }
    }
}

/// `newBid` gossip payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBid {
    /// Bidder.
    pub client_name: String,
    /// Item name.
    pub item: String,
    /// New highest amount.
    pub amount: f64,
}

impl From<&BidPlaced> for NewBid {
    fn from(event: &BidPlaced) -> Self {
        Self {
            client_name: event.bidder.clone(),
            item: event.item.clone(),
            amount: event.amount,
        }
    }
}

/// `auctionClosed` gossip payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionClosed {
    /// Participant that closed the auction.
    pub client_name: String,
    /// Item name.
    pub item: String,
    /// Winning bidder, or [`NO_WINNER`].
    pub winner: String,
    /// Winning amount, or 0.
    pub amount: f64,
}

impl AuctionClosed {
    /// The announced winning bid, or `None` if the auction closed without bids.
    #[must_use]
    pub fn winning_bid(&self) -> Option<(&str, f64)> {
        if self.winner == NO_WINNER && self.amount == 0.0 {
            None
        } else {
            Some((self.winner.as_str(), self.amount))
        }
    }
}

impl From<&AuctionSettled> for AuctionClosed {
    fn from(event: &AuctionSettled) -> Self {
        let (winner, amount) = settled_outcome(event);
        Self {
            client_name: event.closed_by.clone(),
            item: event.item.clone(),
            winner,
            amount,
        }
    }
}

fn settled_outcome(event: &AuctionSettled) -> (String, f64) {
    match (&event.winner, event.amount) {
        (Some(winner), Some(amount)) => (winner.clone(), amount),
        _ => (NO_WINNER.to_string(), 0.0),
    }
}

/// `openAuction` success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAuctionResponse {
    /// Human-readable status line.
    pub status: String,
    /// Item name.
    pub item: String,
}

/// `makeBid` success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeBidResponse {
    /// Human-readable status line.
    pub status: String,
    /// Item name.
    pub item: String,
    /// The offered amount.
    pub amount: f64,
    /// False when the bid did not beat the current highest bid.
    pub accepted: bool,
}

/// `closeAuction` success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAuctionResponse {
    /// Human-readable status line.
    pub status: String,
    /// Winning bidder, or [`NO_WINNER`].
    pub winner: String,
    /// Winning amount, or 0.
    pub amount: f64,
}

impl From<&AuctionSettled> for CloseAuctionResponse {
    fn from(event: &AuctionSettled) -> Self {
        let (winner, amount) = settled_outcome(event);
        Self {
            status: format!("Auction for {} closed", event.item),
            winner,
            amount,
        }
    }
}

/// Failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable category.
    pub code: String,
}

impl From<&NodeError> for ErrorEnvelope {
    fn from(err: &NodeError) -> Self {
        let error = match err {
            NodeError::Remote(remote) => remote.message.clone(),
            other => other.to_string(),
        };
        Self {
            error,
            code: err.code().to_string(),
        }
    }
}

/// Decodes a request or gossip payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, NodeError> {
    serde_json::from_slice(payload).map_err(|e| NodeError::InvalidPayload(e.to_string()))
}

/// Encodes a payload or response body.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NodeError> {
    serde_json::to_vec(value).map_err(|e| NodeError::InvalidPayload(e.to_string()))
}

/// Encodes `err` as an error envelope.
#[must_use]
pub fn error_body(err: &NodeError) -> Vec<u8> {
    let envelope = ErrorEnvelope::from(err);
    serde_json::to_vec(&envelope).unwrap_or_else(|_| br#"{"error":"internal error","code":"Internal"}"#.to_vec())
}

/// True if `body` is the `OK` acknowledgement.
#[must_use]
pub fn is_ok(body: &[u8]) -> bool {
    body.trim_ascii() == OK
}

/// Interprets a response body, surfacing error envelopes as [`RemoteError`].
pub fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, NodeError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| NodeError::InvalidPayload(e.to_string()))?;

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), ToString::to_string);
        let code = value
            .get("code")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        return Err(RemoteError { code, message }.into());
    }

    serde_json::from_value(value).map_err(|e| NodeError::InvalidPayload(e.to_string()))
}
