//! Error types for gavel-market.

use thiserror::Error;

/// Errors returned by auction ledger operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    /// Malformed or out-of-range input (non-positive price, empty item name, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An auction for this item was already opened on this node.
    #[error("auction for item '{0}' already exists")]
    DuplicateAuction(String),

    /// No auction exists for this item.
    #[error("auction for item '{0}' not found")]
    AuctionNotFound(String),

    /// The auction has already been closed.
    #[error("auction for item '{0}' is closed")]
    AuctionClosed(String),

    /// Only the creator may close an auction.
    #[error("{requester} is not authorized to close auction '{item}'")]
    NotAuthorized {
        /// The item whose auction was targeted.
        item: String,
        /// The participant that attempted the close.
        requester: String,
    },
}

impl MarketError {
    /// Stable machine-readable code carried in error envelopes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::DuplicateAuction(_) => "DuplicateAuction",
            Self::AuctionNotFound(_) => "AuctionNotFound",
            Self::AuctionClosed(_) => "AuctionClosed",
            Self::NotAuthorized { .. } => "NotAuthorized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(MarketError::InvalidArgument("price".into()) => "InvalidArgument")]
    #[test_case(MarketError::DuplicateAuction("vase".into()) => "DuplicateAuction")]
    #[test_case(MarketError::AuctionNotFound("vase".into()) => "AuctionNotFound")]
    #[test_case(MarketError::AuctionClosed("vase".into()) => "AuctionClosed")]
    #[test_case(MarketError::NotAuthorized { item: "vase".into(), requester: "bob".into() } => "NotAuthorized")]
    fn error_codes(err: MarketError) -> &'static str {
        err.code()
    }

    #[test]
    fn not_authorized_display() {
        let err = MarketError::NotAuthorized {
            item: "vase".to_string(),
            requester: "bob".to_string(),
        };
        assert_eq!(err.to_string(), "bob is not authorized to close auction 'vase'");
    }
}
