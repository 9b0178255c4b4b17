//! Byzantine-fault-tolerant three-phase replication: PRE-PREPARE / PREPARE /
//! COMMIT, plus a ROUND-CHANGE sub-protocol for liveness when a round's
//! leader is absent or faulty.
//!
//! # Architecture position
//!
//! `consensus` depends only on `crypto`. `storage`, `net`, and `execution`
//! each depend on `consensus`, never the reverse — the phase machine never
//! touches the network, persistence, or application state directly; it
//! communicates exclusively through the injected [`contracts::BlockStore`]
//! and the emitted [`manager::ConsensusEvent`] stream.
//!
//! # Protocol
//!
//! A validator set of size `N` tolerates `f = floor(N/3)` Byzantine faults.
//! Quorum is `2f + 1`; the round-change fast-forward threshold is `f + 1`.
//! Each height proceeds through [`types::Phase`]: `NewRound → PrePrepared →
//! Prepared → Committed → FinalCommitted`, with `RoundChange` the only phase
//! that resets a height back to `NewRound` under a new round.
//!
//! # Usage
//!
//! ```ignore
//! use consensus::{ConsensusConfig, ConsensusManager};
//!
//! let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
//! let manager = ConsensusManager::new(config, validator_set, keypair, block_store, event_tx)?;
//! manager.start().await?;
//!
//! while let Some(event) = event_rx.recv().await {
//!     match event {
//!         ConsensusEvent::BroadcastProposal(p) => { /* send via net */ }
//!         ConsensusEvent::BlockFinalized { height, .. } => { /* notify execution */ }
//!         // ...
//!     }
//! }
//! ```

pub mod config;
pub mod contracts;
pub mod error;
pub mod manager;
pub mod types;
pub mod verifier;
pub mod wire;

pub use config::ConsensusConfig;
pub use contracts::BlockStore;
pub use error::{ConsensusError, Result};
pub use manager::{ConsensusEvent, ConsensusManager, ProcessResult};
pub use types::{
    Block, BlockHeightId, ConsensusState, Genesis, Hash, Header, Phase, Proposal, RotationState,
    SignedBlock, Validator, ValidatorSet, View, Vote, VoteKind, VoteSet,
};
pub use wire::{ConsensusMessage, MessageType};
