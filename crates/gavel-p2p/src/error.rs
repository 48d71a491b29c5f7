//! Error types for gavel-p2p.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::PeerId;

/// Errors that can occur in P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// A peer identity could not be decoded.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// A secret key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single outbound call, as classified by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer's endpoint is gone (terminated, refused, or no route known).
    #[error("channel to peer {peer} is closed")]
    ChannelClosed {
        /// The unreachable peer.
        peer: PeerId,
    },

    /// The peer did not answer in time.
    #[error("call to peer {peer} timed out after {after:?}")]
    Timeout {
        /// The slow peer.
        peer: PeerId,
        /// How long the caller waited.
        after: Duration,
    },

    /// Any other failure; the peer may still be alive.
    #[error("call to peer {peer} failed: {reason}")]
    Failed {
        /// The peer that was called.
        peer: PeerId,
        /// Human-readable cause.
        reason: String,
    },
}

impl TransportError {
    /// The peer the failed call was addressed to.
    #[must_use]
    pub const fn peer(&self) -> PeerId {
        match self {
            Self::ChannelClosed { peer } | Self::Timeout { peer, .. } | Self::Failed { peer, .. } => {
                *peer
            }
        }
    }

    /// True if the failure is evidence the peer has departed.
    ///
    /// Timeouts count as closed channels for pruning purposes.
    #[must_use]
    pub const fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_closed_classification() {
        let peer = PeerId::from_bytes([7u8; 32]);
        assert!(TransportError::ChannelClosed { peer }.is_channel_closed());
        assert!(TransportError::Timeout { peer, after: Duration::from_secs(1) }.is_channel_closed());
        assert!(
            !TransportError::Failed { peer, reason: "bad frame".into() }.is_channel_closed()
        );
    }

    #[test]
    fn transport_error_reports_peer() {
        let peer = PeerId::from_bytes([9u8; 32]);
        let err = TransportError::Failed { peer, reason: "reset".into() };
        assert_eq!(err.peer(), peer);
        assert!(err.to_string().contains(&peer.to_string()));
    }
}
