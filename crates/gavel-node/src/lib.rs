//! # gavel-node
//!
//! A participant in a decentralized, peer-replicated auction.
//!
//! Every node is both a request responder and a peer directory: it answers
//! `openAuction` / `makeBid` / `closeAuction` against its own ledger and gossips
//! each successful state change to the peers it knows.
//!
//! ## Modules
//!
//! - [`proto`]: method names, request/response bodies, error envelopes
//! - [`service`]: [`CoordinationService`], the RPC handler behind every node
//! - [`config`]: JSON node configuration
//! - [`node`]: [`Node`], wiring identity, ledger, transport, and service

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod node;
pub mod proto;
pub mod service;

pub use config::NodeConfig;
pub use error::{NodeError, RemoteError};
pub use node::Node;
pub use service::{CoordinationService, GossipPolicy, ServiceConfig};
