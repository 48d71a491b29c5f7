//! Error types for gavel-node.

use gavel_market::MarketError;
use gavel_p2p::P2pError;
use gavel_persist::PersistError;
use thiserror::Error;

/// Error reported by a remote node in an `{error, code}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Machine-readable category (`AuctionClosed`, `NotAuthorized`, ...).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The auction ledger rejected the operation.
    #[error(transparent)]
    Market(#[from] MarketError),

    /// P2P layer failure.
    #[error("p2p error: {0}")]
    P2p(#[from] P2pError),

    /// Journal or identity file failure.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// A request or response body could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The method name is not part of the protocol.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// A remote node answered with an error envelope.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Code carried in the error envelope sent back to callers.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Market(e) => e.code(),
            Self::InvalidPayload(_) | Self::UnknownMethod(_) => "InvalidArgument",
            Self::Remote(e) => &e.code,
            Self::P2p(_) => "TransportError",
            Self::Persist(_) | Self::Config(_) | Self::Io(_) => "Internal",
        }
    }
}
