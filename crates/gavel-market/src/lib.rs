//! # gavel-market
//!
//! Auction ledger for a gavel node.
//!
//! This crate provides:
//!
//! - The auction record and its `Open -> Closed` lifecycle
//! - Bid acceptance (strictly-higher-wins) and settlement rules
//! - [`AuctionLedger`], a per-item locked store with an optional write-ahead journal

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auction;
pub mod error;
pub mod events;
pub mod ledger;

pub use auction::{validate_amount, Auction, AuctionState, Bid};
pub use error::MarketError;
pub use events::{AuctionOpened, AuctionSettled, BidOutcome, BidPlaced};
pub use ledger::AuctionLedger;
