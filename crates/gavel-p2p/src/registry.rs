//! Registry of known peers.
//!
//! Peers join through an explicit `addPeer` handshake and leave when a call to
//! them reports a closed channel. The local identity is never registered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::protocol::PeerId;

/// What happens to a peer's record once it is found unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Delete the record; a later `addPeer` starts over.
    #[default]
    Remove,
    /// Keep the record with `reachable = false` for diagnostics.
    Retain,
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// The peer's identity.
    pub peer_id: PeerId,
    /// Display name from the handshake, if one was given.
    pub name: Option<String>,
    /// False once a call to the peer reported a closed channel.
    pub reachable: bool,
    /// When the peer was (last) registered.
    pub added_at: DateTime<Utc>,
}

/// Internally synchronized table of known peers.
#[derive(Debug)]
pub struct PeerRegistry {
    local_peer_id: PeerId,
    policy: UnreachablePolicy,
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    /// Creates an empty registry for the node identified by `local_peer_id`.
    #[must_use]
    pub fn new(local_peer_id: PeerId) -> Self {
        Self::with_policy(local_peer_id, UnreachablePolicy::default())
    }

    /// Creates an empty registry with an explicit unreachable-peer policy.
    #[must_use]
    pub fn with_policy(local_peer_id: PeerId, policy: UnreachablePolicy) -> Self {
        Self {
            local_peer_id,
            policy,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the local peer ID.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Registers a peer. Returns `true` if it became (or became again) reachable.
    ///
    /// Adding the local identity or an already reachable peer is a no-op.
    pub fn add(&self, peer_id: PeerId, name: Option<String>) -> bool {
        if peer_id == self.local_peer_id {
            debug!(peer = %peer_id.short(), "ignoring self registration");
            return false;
        }

        let mut peers = self.peers.write();
        if let Some(record) = peers.get_mut(&peer_id) {
            if record.reachable {
                return false;
            }
            record.reachable = true;
            record.added_at = Utc::now();
            if name.is_some() {
                record.name = name;
            }
        } else {
            peers.insert(
                peer_id,
                PeerRecord {
                    peer_id,
                    name,
                    reachable: true,
                    added_at: Utc::now(),
                },
            );
        }
        drop(peers);

        info!(peer = %peer_id, "peer added");
        true
    }

    /// Marks a peer unreachable so later broadcasts skip it.
    ///
    /// Returns `true` if the peer was reachable before the call.
    pub fn mark_unreachable(&self, peer_id: &PeerId) -> bool {
        let mut peers = self.peers.write();
        let was_reachable = match self.policy {
            UnreachablePolicy::Remove => peers.remove(peer_id).is_some_and(|r| r.reachable),
            UnreachablePolicy::Retain => peers
                .get_mut(peer_id)
                .is_some_and(|r| std::mem::replace(&mut r.reachable, false)),
        };
        drop(peers);

        if was_reachable {
            match self.policy {
                UnreachablePolicy::Remove => info!(peer = %peer_id, "peer removed"),
                UnreachablePolicy::Retain => info!(peer = %peer_id, "peer marked unreachable"),
            }
        }
        was_reachable
    }

    /// Snapshot of every reachable peer; order is unspecified.
    #[must_use]
    pub fn active_peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .values()
            .filter(|r| r.reachable)
            .map(|r| r.peer_id)
            .collect()
    }

    /// Returns the record for a peer.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.read().get(peer_id).cloned()
    }

    /// True if any record exists for the peer, reachable or not.
    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    /// True if the peer is registered and reachable.
    #[must_use]
    pub fn is_active(&self, peer_id: &PeerId) -> bool {
        self.peers.read().get(peer_id).is_some_and(|r| r.reachable)
    }

    /// Number of records, reachable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// True if no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeKeypair;

    fn make_peer_id() -> PeerId {
        NodeKeypair::generate().peer_id()
    }

    #[test]
    fn add_peer() {
        let registry = PeerRegistry::new(make_peer_id());
        let peer = make_peer_id();

        assert!(registry.add(peer, Some("bob".to_string())));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_active(&peer));
        assert_eq!(registry.get(&peer).unwrap().name.as_deref(), Some("bob"));
    }

    #[test]
    fn add_is_idempotent() {
        let registry = PeerRegistry::new(make_peer_id());
        let peer = make_peer_id();

        assert!(registry.add(peer, None));
        assert!(!registry.add(peer, None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cannot_add_self() {
        let local = make_peer_id();
        let registry = PeerRegistry::new(local);

        assert!(!registry.add(local, None));
        assert!(registry.is_empty());
        assert!(registry.active_peers().is_empty());
    }

    #[test]
    fn mark_unreachable_removes_by_default() {
        let registry = PeerRegistry::new(make_peer_id());
        let peer = make_peer_id();
        registry.add(peer, None);

        assert!(registry.mark_unreachable(&peer));
        assert!(!registry.contains(&peer));
        assert!(registry.active_peers().is_empty());
        assert!(!registry.mark_unreachable(&peer));
    }

    #[test]
    fn retain_policy_keeps_record() {
        let registry = PeerRegistry::with_policy(make_peer_id(), UnreachablePolicy::Retain);
        let peer = make_peer_id();
        registry.add(peer, Some("bob".to_string()));

        assert!(registry.mark_unreachable(&peer));
        assert!(registry.contains(&peer));
        assert!(!registry.is_active(&peer));
        let record = registry.get(&peer).unwrap();
        assert!(!record.reachable);
        assert_eq!(registry.len(), 1);
        assert!(registry.active_peers().is_empty());

        // Re-registering revives the record
        assert!(registry.add(peer, None));
        assert!(registry.is_active(&peer));
        assert_eq!(registry.get(&peer).unwrap().name.as_deref(), Some("bob"));
    }

    #[test]
    fn active_peers_lists_all_reachable() {
        let registry = PeerRegistry::new(make_peer_id());
        let peers: Vec<_> = (0..5).map(|_| make_peer_id()).collect();
        for peer in &peers {
            registry.add(*peer, None);
        }
        registry.mark_unreachable(&peers[2]);

        let mut active = registry.active_peers();
        active.sort();
        let mut expected: Vec<_> = peers.iter().copied().filter(|p| *p != peers[2]).collect();
        expected.sort();
        assert_eq!(active, expected);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn registry_never_contains_local(seeds in prop::collection::vec(any::<[u8; 32]>(), 0..20)) {
                let local = PeerId::from_bytes([0u8; 32]);
                let registry = PeerRegistry::new(local);
                registry.add(local, None);
                for seed in seeds {
                    registry.add(PeerId::from_bytes(seed), None);
                }
                prop_assert!(registry.get(&local).is_none());
                prop_assert!(!registry.active_peers().contains(&local));
            }
        }
    }
}
