//! Auction records and lifecycle.
//!
//! An auction moves `Open -> Closed` exactly once. While open it tracks the
//! highest accepted bid; once closed nothing about it changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MarketError;
use crate::events::{AuctionSettled, BidOutcome, BidPlaced};

/// The state of an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionState {
    /// Accepting bids.
    Open,
    /// Settled; terminal.
    Closed,
}

impl AuctionState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!((self, target), (Self::Open, Self::Closed))
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for AuctionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A bid recorded against an auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    /// Name of the bidding participant.
    pub bidder: String,
    /// Offered amount.
    pub amount: f64,
    /// When the bid was accepted.
    pub placed_at: DateTime<Utc>,
}

impl Bid {
    /// Creates a bid stamped with the current time.
    #[must_use]
    pub fn new(bidder: impl Into<String>, amount: f64) -> Self {
        Self {
            bidder: bidder.into(),
            amount,
            placed_at: Utc::now(),
        }
    }
}

/// An auction for a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    /// Item name; unique for the lifetime of a ledger.
    pub item: String,
    /// Asking price the auction was opened with.
    pub start_price: f64,
    /// Name of the participant that opened the auction.
    pub creator: String,
    /// Highest accepted bid so far.
    pub highest_bid: Option<Bid>,
    /// Current lifecycle state.
    pub state: AuctionState,
    /// When the auction was opened.
    pub opened_at: DateTime<Utc>,
    /// When the auction was closed.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Auction {
    /// Creates a new open auction with no bids.
    #[must_use]
    pub fn new(item: impl Into<String>, start_price: f64, creator: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            start_price,
            creator: creator.into(),
            highest_bid: None,
            state: AuctionState::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Returns true while bids are accepted.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, AuctionState::Open)
    }

    /// Amount of the highest accepted bid, if any.
    #[must_use]
    pub fn highest_amount(&self) -> Option<f64> {
        self.highest_bid.as_ref().map(|b| b.amount)
    }

    /// Offers a bid. Only a strict improvement replaces the current highest bid.
    ///
    /// The amount must already be validated.
    pub(crate) fn offer(&mut self, bidder: &str, amount: f64) -> Result<BidOutcome, MarketError> {
        if self.state.is_terminal() {
            return Err(MarketError::AuctionClosed(self.item.clone()));
        }

        match self.highest_amount() {
            Some(current) if amount <= current => Ok(BidOutcome::NotHighest {
                item: self.item.clone(),
                amount,
                current_highest: current,
            }),
            _ => {
                self.highest_bid = Some(Bid::new(bidder, amount));
                Ok(BidOutcome::Accepted(BidPlaced {
                    item: self.item.clone(),
                    bidder: bidder.to_string(),
                    amount,
                }))
            }
        }
    }

    /// Closes the auction on behalf of `requester`, who must be the creator.
    pub(crate) fn settle(&mut self, requester: &str) -> Result<AuctionSettled, MarketError> {
        if self.state.is_terminal() {
            return Err(MarketError::AuctionClosed(self.item.clone()));
        }
        if requester != self.creator {
            return Err(MarketError::NotAuthorized {
                item: self.item.clone(),
                requester: requester.to_string(),
            });
        }

        self.transition_to(AuctionState::Closed)?;
        Ok(self.settlement(requester))
    }

    /// Closes the auction with a winner announced by the node that owns it.
    ///
    /// The announced bid replaces the local one when it differs, so this node
    /// converges on the owner's outcome.
    pub(crate) fn settle_remote(
        &mut self,
        requester: &str,
        winner: Option<Bid>,
    ) -> Result<AuctionSettled, MarketError> {
        if self.state.is_terminal() {
            return Err(MarketError::AuctionClosed(self.item.clone()));
        }
        if requester != self.creator {
            return Err(MarketError::NotAuthorized {
                item: self.item.clone(),
                requester: requester.to_string(),
            });
        }

        if let Some(bid) = winner {
            self.highest_bid = Some(bid);
        }
        self.transition_to(AuctionState::Closed)?;
        Ok(self.settlement(requester))
    }

    fn settlement(&self, closed_by: &str) -> AuctionSettled {
        AuctionSettled {
            item: self.item.clone(),
            closed_by: closed_by.to_string(),
            winner: self.highest_bid.as_ref().map(|b| b.bidder.clone()),
            amount: self.highest_amount(),
        }
    }

    fn transition_to(&mut self, target: AuctionState) -> Result<(), MarketError> {
        if !self.state.can_transition_to(&target) {
            return Err(MarketError::AuctionClosed(self.item.clone()));
        }
        self.state = target;
        if target == AuctionState::Closed {
            self.closed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Checks that a price or bid amount is a positive finite number.
pub fn validate_amount(field: &str, value: f64) -> Result<(), MarketError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MarketError::InvalidArgument(format!(
            "{field} must be a positive number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn state_transitions() {
        assert!(AuctionState::Open.can_transition_to(&AuctionState::Closed));
        assert!(!AuctionState::Closed.can_transition_to(&AuctionState::Open));
        assert!(!AuctionState::Closed.can_transition_to(&AuctionState::Closed));
        assert!(!AuctionState::Open.can_transition_to(&AuctionState::Open));
        assert!(AuctionState::Closed.is_terminal());
    }

    #[test]
    fn new_auction_is_open_without_bids() {
        let auction = Auction::new("vase", 10.0, "alice");
        assert!(auction.is_open());
        assert_eq!(auction.highest_amount(), None);
        assert!(auction.closed_at.is_none());
    }

    #[test]
    fn first_bid_is_accepted_even_below_start_price() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        let outcome = auction.offer("bob", 5.0).unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(auction.highest_amount(), Some(5.0));
    }

    #[test]
    fn equal_bid_is_not_highest() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        auction.offer("bob", 15.0).unwrap();
        let outcome = auction.offer("carol", 15.0).unwrap();

        assert!(!outcome.is_accepted());
        assert_eq!(auction.highest_bid.as_ref().unwrap().bidder, "bob");
    }

    #[test]
    fn settle_records_winner() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        auction.offer("bob", 15.0).unwrap();
        let settled = auction.settle("alice").unwrap();

        assert_eq!(settled.winner.as_deref(), Some("bob"));
        assert_eq!(settled.amount, Some(15.0));
        assert_eq!(auction.state, AuctionState::Closed);
        assert!(auction.closed_at.is_some());
    }

    #[test]
    fn settle_by_other_is_rejected() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        let err = auction.settle("mallory").unwrap_err();
        assert!(matches!(err, MarketError::NotAuthorized { .. }));
        assert!(auction.is_open());
    }

    #[test]
    fn offer_after_close_is_rejected() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        auction.settle("alice").unwrap();
        let err = auction.offer("bob", 100.0).unwrap_err();
        assert_eq!(err, MarketError::AuctionClosed("vase".to_string()));
    }

    #[test]
    fn settle_remote_adopts_announced_winner() {
        let mut auction = Auction::new("vase", 10.0, "alice");
        auction.offer("bob", 12.0).unwrap();
        let settled = auction
            .settle_remote("alice", Some(Bid::new("carol", 20.0)))
            .unwrap();
        assert_eq!(settled.winner.as_deref(), Some("carol"));
        assert_eq!(settled.amount, Some(20.0));
    }

    #[test_case(10.0 => true; "positive")]
    #[test_case(0.01 => true; "fractional")]
    #[test_case(0.0 => false; "zero")]
    #[test_case(-5.0 => false; "negative")]
    #[test_case(f64::NAN => false; "nan")]
    #[test_case(f64::INFINITY => false; "infinite")]
    fn amount_validation(value: f64) -> bool {
        validate_amount("price", value).is_ok()
    }
}
