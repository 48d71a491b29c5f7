//! The auction ledger.
//!
//! Auctions live behind one mutex each, so operations on different items run
//! in parallel while bids and closes on the same item are serialized. The
//! outer map lock is held only long enough to find or insert an entry.

use std::collections::HashMap;
use std::sync::Arc;

use gavel_persist::AppendLog;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::auction::{validate_amount, Auction, Bid};
use crate::error::MarketError;
use crate::events::{AuctionOpened, AuctionSettled, BidOutcome};

type AuctionCell = Arc<Mutex<Auction>>;

/// Per-node store of auctions.
#[derive(Debug, Default)]
pub struct AuctionLedger {
    auctions: RwLock<HashMap<String, AuctionCell>>,
    journal: Option<AppendLog<Auction>>,
}

impl AuctionLedger {
    /// Creates an empty in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that records every mutation to `journal`, restoring
    /// whatever auctions the journal already holds.
    #[must_use]
    pub fn with_journal(journal: AppendLog<Auction>) -> Self {
        let auctions: HashMap<_, _> = journal
            .entries()
            .into_iter()
            .map(|(item, auction)| (item, Arc::new(Mutex::new(auction))))
            .collect();
        info!(
            path = %journal.path().display(),
            restored = auctions.len(),
            "restored auction ledger"
        );

        Self {
            auctions: RwLock::new(auctions),
            journal: Some(journal),
        }
    }

    /// Opens an auction for `item`.
    ///
    /// An item name can be used once per ledger, even after its auction closed.
    pub fn open(
        &self,
        item: &str,
        start_price: f64,
        creator: &str,
    ) -> Result<AuctionOpened, MarketError> {
        require_name("item", item)?;
        require_name("creator", creator)?;
        validate_amount("price", start_price)?;

        let mut auctions = self.auctions.write();
        if auctions.contains_key(item) {
            return Err(MarketError::DuplicateAuction(item.to_string()));
        }

        let cell = Arc::new(Mutex::new(Auction::new(item, start_price, creator)));
        auctions.insert(item.to_string(), Arc::clone(&cell));
        // Journal under the item lock only; bids on the new item queue behind it
        let auction = cell.lock();
        drop(auctions);
        self.record(&auction);
        drop(auction);

        info!(item, start_price, creator, "auction opened");
        Ok(AuctionOpened {
            item: item.to_string(),
            start_price,
            creator: creator.to_string(),
        })
    }

    /// Places a bid on `item`.
    ///
    /// A valid bid that does not beat the current highest bid is not an error;
    /// it yields [`BidOutcome::NotHighest`] and leaves the auction unchanged.
    pub fn bid(&self, item: &str, bidder: &str, amount: f64) -> Result<BidOutcome, MarketError> {
        require_name("bidder", bidder)?;
        let cell = self.entry(item)?;
        validate_amount("amount", amount)?;

        let mut auction = cell.lock();
        let outcome = auction.offer(bidder, amount)?;
        match &outcome {
            BidOutcome::Accepted(placed) => {
                self.record(&auction);
                info!(item, bidder, amount = placed.amount, "new highest bid");
            }
            BidOutcome::NotHighest {
                current_highest, ..
            } => {
                debug!(item, bidder, amount, current_highest, "bid not above highest");
            }
        }
        Ok(outcome)
    }

    /// Closes the auction for `item`. Only its creator may do so.
    pub fn close(&self, item: &str, requester: &str) -> Result<AuctionSettled, MarketError> {
        let cell = self.entry(item)?;

        let mut auction = cell.lock();
        let settled = auction.settle(requester)?;
        self.record(&auction);
        drop(auction);

        info!(
            item,
            winner = settled.winner.as_deref().unwrap_or("-"),
            amount = settled.amount.unwrap_or(0.0),
            "auction closed"
        );
        Ok(settled)
    }

    /// Applies a close announced by the node that owns the auction.
    ///
    /// Same checks as [`AuctionLedger::close`], but the announced winner is
    /// recorded even if this node never saw the winning bid.
    pub fn apply_remote_close(
        &self,
        item: &str,
        requester: &str,
        winner: Option<(&str, f64)>,
    ) -> Result<AuctionSettled, MarketError> {
        let cell = self.entry(item)?;
        if let Some((_, amount)) = winner {
            validate_amount("amount", amount)?;
        }

        let mut auction = cell.lock();
        let settled =
            auction.settle_remote(requester, winner.map(|(bidder, amount)| Bid::new(bidder, amount)))?;
        self.record(&auction);
        drop(auction);

        debug!(item, winner = settled.winner.as_deref().unwrap_or("-"), "applied remote close");
        Ok(settled)
    }

    /// Returns a snapshot of the auction for `item`.
    pub fn get(&self, item: &str) -> Option<Auction> {
        let cell = self.auctions.read().get(item).cloned()?;
        let auction = cell.lock().clone();
        Some(auction)
    }

    /// Returns a snapshot of every auction, sorted by item.
    pub fn list(&self) -> Vec<Auction> {
        let cells: Vec<AuctionCell> = self.auctions.read().values().cloned().collect();
        let mut auctions: Vec<Auction> = cells.iter().map(|c| c.lock().clone()).collect();
        auctions.sort_by(|a, b| a.item.cmp(&b.item));
        auctions
    }

    /// Number of auctions ever opened on this ledger.
    pub fn len(&self) -> usize {
        self.auctions.read().len()
    }

    /// True if no auction was ever opened.
    pub fn is_empty(&self) -> bool {
        self.auctions.read().is_empty()
    }

    fn entry(&self, item: &str) -> Result<AuctionCell, MarketError> {
        self.auctions
            .read()
            .get(item)
            .cloned()
            .ok_or_else(|| MarketError::AuctionNotFound(item.to_string()))
    }

    fn record(&self, auction: &Auction) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.put(&auction.item, auction) {
                warn!(item = %auction.item, error = %e, "failed to journal auction");
            }
        }
    }
}

fn require_name(field: &str, value: &str) -> Result<(), MarketError> {
    if value.trim().is_empty() {
        return Err(MarketError::InvalidArgument(format!("{field} cannot be empty")));
    }
    Ok(())
}
