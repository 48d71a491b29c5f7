//! # gavel-p2p
//!
//! P2P layer for gavel auction nodes.
//!
//! This crate provides:
//!
//! - Peer identities derived from Ed25519 public keys
//! - A registry of known peers and their reachability
//! - The request/response transport abstraction nodes talk through
//! - Best-effort gossip fan-out that prunes peers whose channel closed
//! - A length-delimited TCP transport and server
//!
//! ## Core Types
//!
//! - [`PeerId`]: 32-byte public key identifying a participant, hex on the wire
//! - [`PeerRegistry`]: internally synchronized table of known peers
//! - [`RpcTransport`] / [`RpcHandler`]: outbound and inbound sides of a call
//! - [`GossipBroadcaster`]: concurrent fan-out with per-call timeouts
//! - [`TcpTransport`] / [`RpcServer`]: TCP implementation of the transport

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod gossip;
pub mod protocol;
pub mod registry;
pub mod tcp;
pub mod transport;

pub use error::{P2pError, TransportError};
pub use gossip::{BroadcastConfig, BroadcastReport, GossipBroadcaster};
pub use protocol::{NodeKeypair, PeerId};
pub use registry::{PeerRecord, PeerRegistry, UnreachablePolicy};
pub use tcp::{RpcServer, TcpTransport};
pub use transport::{BoxFuture, MemoryNetwork, MemoryTransport, RpcHandler, RpcTransport};
