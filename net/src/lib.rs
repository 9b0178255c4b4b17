//! # net — P2P transport for the BFT replication engine
//!
//! `net` carries [`consensus`] messages between validators. It handles
//! peer discovery, gossip propagation, and wire framing.
//!
//! ## Design Principles
//!
//! - **Never mutates consensus state** - only delivers messages
//! - **Never verifies signatures or view membership** - that's `consensus`'s job
//! - **Event-driven** - async channels for message passing
//!
//! ## Trust Model
//!
//! `net` carries rumors, not facts: every message it forwards must still
//! pass through [`consensus::ConsensusManager`]'s own verification before
//! it affects anything.

pub mod config;
pub mod error;
pub mod libp2p_network;
pub mod message;
pub mod network;
pub mod peer;
pub mod sync;

pub use config::NetworkConfig;
pub use error::NetworkError;
pub use libp2p_network::Libp2pNetwork;
pub use message::NetworkMessage;
pub use network::Network;
pub use peer::PeerId;
pub use sync::{SyncRequest, SyncState, Synchronizer};
