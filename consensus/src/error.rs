//! Consensus error taxonomy.
//!
//! Validation errors are per-message and recoverable by dropping the
//! message — a Byzantine sender is expected, never propagated up the
//! network stack. [`ConsensusError::Fatal`] is the one variant that is not:
//! it signals a condition with no sensible local recovery (missing chain
//! head, local identity absent from the validator set), and the `node`
//! binary's top level matches on it to exit the process.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("no proposer could be determined for the current view")]
    UnknownProposer,

    #[error("block does not link to the current chain head")]
    UnlinkableBlock,

    #[error("block height/id pair is invalid")]
    InvalidBlockIdOrHeight,

    #[error("proposer signature does not recover to the claimed proposer")]
    InvalidProposerSignature,

    #[error("vote view does not match the current state view")]
    ViewMismatch,

    #[error("phase is not ready to accept this input")]
    PhaseNotReady,

    #[error("vote block id does not match the accepted proposal")]
    BlockIdMismatch,

    #[error("vote kind does not match this vote set")]
    TypeMismatch,

    #[error("voter is not a member of the validator set")]
    UnknownVoter,

    #[error("duplicate vote from this voter for this view")]
    DuplicateVote,

    #[error("signature does not verify")]
    InvalidSignature,

    #[error("round-change vote is out of the acceptable range")]
    RoundChangeOutOfRange,

    /// A condition with no sensible local recovery: abort the node.
    #[error("fatal consensus condition: {reason}")]
    Fatal { reason: String },
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
