//! Minimal state-root tracking.
//!
//! There is no account or transaction model here: execution/state-transition
//! semantics are out of scope for this engine. `State` only derives a new
//! root from each finalized block's height and id, which is enough for
//! `node` to expose a state root to a CLI or status endpoint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RuntimeError;

/// The stub's entire notion of "application state": a height and a root
/// hash folded over every finalized block seen so far.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    pub height: u64,
    pub state_root: [u8; 32],
}

impl State {
    /// The state before any block has been finalized.
    pub fn genesis() -> Self {
        Self {
            height: 0,
            state_root: [0u8; 32],
        }
    }

    /// Fold a newly finalized block into state. The next root is
    /// `sha256(old_root || height || block_id)` — deterministic, and
    /// enough to detect any divergence between replicas without carrying
    /// any transaction semantics.
    pub fn apply_finalized_block(
        &mut self,
        height: u64,
        block_id: [u8; 32],
    ) -> Result<(), RuntimeError> {
        if height != self.height + 1 {
            return Err(RuntimeError::HeightMismatch {
                expected: self.height + 1,
                got: height,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(self.state_root);
        hasher.update(height.to_le_bytes());
        hasher.update(block_id);
        let digest = hasher.finalize();

        let mut root = [0u8; 32];
        root.copy_from_slice(&digest);
        self.state_root = root;
        self.height = height;
        Ok(())
    }
}

impl Default for State {
    fn default() -> Self {
        Self::genesis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_root_is_zero() {
        let state = State::genesis();
        assert_eq!(state.state_root, [0u8; 32]);
        assert_eq!(state.height, 0);
    }

    #[test]
    fn applying_a_block_changes_the_root_deterministically() {
        let mut a = State::genesis();
        let mut b = State::genesis();

        a.apply_finalized_block(1, [7u8; 32]).unwrap();
        b.apply_finalized_block(1, [7u8; 32]).unwrap();

        assert_eq!(a.state_root, b.state_root);
        assert_ne!(a.state_root, [0u8; 32]);
    }

    #[test]
    fn rejects_out_of_order_heights() {
        let mut state = State::genesis();
        let err = state.apply_finalized_block(2, [1u8; 32]).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::HeightMismatch {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn different_blocks_produce_different_roots() {
        let mut a = State::genesis();
        let mut b = State::genesis();

        a.apply_finalized_block(1, [1u8; 32]).unwrap();
        b.apply_finalized_block(1, [2u8; 32]).unwrap();

        assert_ne!(a.state_root, b.state_root);
    }
}
