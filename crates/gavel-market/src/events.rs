//! Outcomes of ledger operations, handed to the gossip layer.

use serde::{Deserialize, Serialize};

/// A new auction was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionOpened {
    /// Item name.
    pub item: String,
    /// Asking price.
    pub start_price: f64,
    /// Participant that opened it.
    pub creator: String,
}

/// A bid became the new highest bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidPlaced {
    /// Item name.
    pub item: String,
    /// Bidding participant.
    pub bidder: String,
    /// Accepted amount.
    pub amount: f64,
}

/// Result of a valid bid against an open auction.
#[derive(Debug, Clone, PartialEq)]
pub enum BidOutcome {
    /// The bid is the new highest bid.
    Accepted(BidPlaced),
    /// The bid did not beat the current highest bid; nothing changed.
    NotHighest {
        /// Item name.
        item: String,
        /// The offered amount.
        amount: f64,
        /// The highest amount still standing.
        current_highest: f64,
    },
}

impl BidOutcome {
    /// Returns true if the bid became the highest bid.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// An auction was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionSettled {
    /// Item name.
    pub item: String,
    /// Participant that closed it.
    pub closed_by: String,
    /// Highest bidder, or `None` if nobody bid.
    pub winner: Option<String>,
    /// Winning amount, or `None` if nobody bid.
    pub amount: Option<f64>,
}
