//! Peer identity.
//!
//! - [`PeerId`]: a participant's 32-byte Ed25519 public key
//! - [`NodeKeypair`]: the local node's signing key, from which its `PeerId` derives
//!
//! Identities cross the wire as lowercase hex.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::P2pError;

/// Length of a peer identity in bytes.
pub const PEER_ID_LEN: usize = 32;

/// Unique identifier for a peer in the network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    bytes: [u8; PEER_ID_LEN],
}

impl PeerId {
    /// Creates a `PeerId` from an Ed25519 public key.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Creates a `PeerId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self { bytes }
    }

    /// Parses the hex form produced by [`PeerId::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, P2pError> {
        let raw = hex::decode(s.trim()).map_err(|e| P2pError::InvalidPeerId(e.to_string()))?;
        let bytes: [u8; PEER_ID_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            P2pError::InvalidPeerId(format!("expected {PEER_ID_LEN} bytes, got {}", v.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Returns the raw bytes of the peer ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.bytes
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.bytes[..4])
    }

    /// Interprets the bytes as an Ed25519 verifying key.
    #[must_use]
    pub fn to_verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.bytes).ok()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The local node's Ed25519 keypair.
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generates a fresh keypair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a keypair from its hex-encoded 32-byte secret.
    pub fn from_secret_hex(s: &str) -> Result<Self, P2pError> {
        let raw = hex::decode(s.trim()).map_err(|e| P2pError::InvalidKey(e.to_string()))?;
        let secret: [u8; 32] = raw
            .try_into()
            .map_err(|_| P2pError::InvalidKey("secret key must be 32 bytes".to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Hex-encoded secret, suitable for [`NodeKeypair::from_secret_hex`].
    #[must_use]
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// The public half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The identity other peers know this node by.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.verifying_key())
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}
