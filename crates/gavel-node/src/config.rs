//! Node configuration.
//!
//! Loaded from a TOML file:
//! - Participant name, listen address, and the address advertised to peers
//! - Optional data directory for the identity key and auction journal
//! - Gossip timeouts and inbound gossip policy
//! - Log output format
//! - Bootstrap peers to handshake with on startup

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gavel_p2p::{BroadcastConfig, NodeKeypair, PeerId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::NodeError;
use crate::service::{GossipPolicy, ServiceConfig};

/// File under the data directory holding the node's secret key.
pub const IDENTITY_FILE: &str = "identity.key";

/// Journal name under the data directory.
pub const JOURNAL_NAME: &str = "auctions";

/// Gossip settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GossipConfig {
    /// Upper bound on each outbound gossip call, in milliseconds.
    pub call_timeout_ms: u64,
    /// What to do with inbound gossip.
    pub policy: GossipPolicy,
    /// Run broadcasts in the background instead of before responding.
    pub detach: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            policy: GossipPolicy::default(),
            detach: false,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

/// A peer to handshake with on startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapPeer {
    /// The peer's identity.
    pub public_key: PeerId,
    /// Where the peer listens.
    pub address: SocketAddr,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Main node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Participant name; used as `clientName` for local actions.
    pub name: String,
    /// Address the RPC server binds.
    pub listen_addr: SocketAddr,
    /// Address peers use to reach us. Defaults to the bound address when that
    /// is a concrete IP and port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<SocketAddr>,
    /// Where the identity key and auction journal live. In-memory only if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Gossip settings.
    #[serde(default)]
    pub gossip: GossipConfig,
    /// Log settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Peers to join on startup.
    #[serde(default)]
    pub bootstrap: Vec<BootstrapPeer>,
}

impl NodeConfig {
    /// Creates a config with defaults for everything but name and address.
    #[must_use]
    pub fn new(name: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            listen_addr,
            advertise_addr: None,
            data_dir: None,
            gossip: GossipConfig::default(),
            log: LogConfig::default(),
            bootstrap: Vec::new(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), NodeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.name.is_empty() {
            return Err(NodeError::Config("node name cannot be empty".to_string()));
        }

        if self.name.len() > 64 {
            return Err(NodeError::Config(
                "node name cannot exceed 64 characters".to_string(),
            ));
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '#'))
        {
            return Err(NodeError::Config(
                "node name must contain only alphanumeric characters, '-', '_' and '#'"
                    .to_string(),
            ));
        }

        if self.gossip.call_timeout_ms == 0 {
            return Err(NodeError::Config(
                "gossip.call_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(addr) = self.advertise_addr.filter(|a| !is_routable(*a)) {
            return Err(NodeError::Config(format!(
                "advertise_addr {addr} must have a concrete IP and a non-zero port"
            )));
        }

        if let Some(peer) = self
            .bootstrap
            .iter()
            .find(|p| p.address == self.listen_addr)
        {
            return Err(NodeError::Config(format!(
                "bootstrap peer {} points at our own listen address",
                peer.public_key.short()
            )));
        }

        Ok(())
    }

    /// Broadcast settings derived from the gossip section.
    #[must_use]
    pub const fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            call_timeout: Duration::from_millis(self.gossip.call_timeout_ms),
        }
    }

    /// Service settings derived from the gossip section.
    #[must_use]
    pub const fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            gossip_policy: self.gossip.policy,
            detach_broadcast: self.gossip.detach,
        }
    }

    /// Address to advertise once the server is bound to `bound`.
    ///
    /// `None` when nothing is configured and `bound` is a wildcard address,
    /// since peers cannot dial that back.
    #[must_use]
    pub fn advertise_addr_for(&self, bound: SocketAddr) -> Option<SocketAddr> {
        self.advertise_addr
            .or_else(|| is_routable(bound).then_some(bound))
    }

    /// Loads the node identity from the data directory, creating it on first run.
    ///
    /// Without a data directory a fresh identity is generated each start.
    pub fn load_identity(&self) -> Result<NodeKeypair, NodeError> {
        let Some(dir) = &self.data_dir else {
            return Ok(NodeKeypair::generate());
        };

        let path = dir.join(IDENTITY_FILE);
        if path.exists() {
            let secret = std::fs::read_to_string(&path)?;
            let keypair = NodeKeypair::from_secret_hex(&secret)?;
            info!(path = %path.display(), peer = %keypair.peer_id(), "loaded identity");
            return Ok(keypair);
        }

        std::fs::create_dir_all(dir)?;
        let keypair = NodeKeypair::generate();
        std::fs::write(&path, keypair.secret_hex())?;
        info!(path = %path.display(), peer = %keypair.peer_id(), "generated identity");
        Ok(keypair)
    }
}

fn is_routable(addr: SocketAddr) -> bool {
    !addr.ip().is_unspecified() && addr.port() != 0
}
