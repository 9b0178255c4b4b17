//! Error types for the execution stub.

use thiserror::Error;

/// Errors that can occur while folding a finalized block into state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A finalized block arrived out of height order.
    #[error("block height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
}
