//! Narrow external-collaborator contracts.
//!
//! The manager is injected with implementations of these traits rather than
//! owning storage, wall-clock timers, or broadcast I/O directly — the
//! "global singleton block-store" and "timer/IO coupling" redesign notes
//! both resolve to the same shape: small capability interfaces the caller
//! provides, so tests can supply in-memory/deterministic doubles.

use async_trait::async_trait;

use crate::error::ConsensusError;
use crate::types::Block;

/// Out-of-scope block persistence layer.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Current chain head, or `None` only when the chain lacks a genesis
    /// block — fatal for consensus.
    async fn head(&self) -> Option<Block>;

    /// Persist `block`. Must return success iff the block is durably
    /// stored at `block.header.height_id.height`, and must refuse a
    /// duplicate height.
    async fn add_block(&self, block: Block) -> Result<(), ConsensusError>;
}
