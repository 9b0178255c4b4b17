//! Catch-up synchronizer.
//!
//! A node that falls behind the validator set's committed height needs a
//! way to notice and ask a peer for the blocks it missed before it can
//! usefully participate in consensus again. This is a narrow stub: it
//! tracks the `Catchup`/`InSync` state and the height bookkeeping a real
//! synchronizer would need, but does not implement block transfer itself
//! — `ConsensusManager::start_new_round`'s "chain caught up" check is the
//! only consumer today.

use serde::{Deserialize, Serialize};

/// Whether we believe we're caught up with the network or are fetching
/// blocks we're missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Catchup,
    InSync,
}

/// Request sent to a peer asking for blocks starting at `from_height`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_height: u64,
}

impl SyncRequest {
    pub fn new(from_height: u64) -> Self {
        Self { from_height }
    }
}

/// Tracks catch-up progress against the highest height we've observed a
/// peer claim.
pub struct Synchronizer {
    known_height: u64,
    last_requested_height: u64,
    expected_height: u64,
    state: SyncState,
}

impl Synchronizer {
    pub fn new(local_height: u64) -> Self {
        Self {
            known_height: local_height,
            last_requested_height: local_height,
            expected_height: local_height,
            state: SyncState::InSync,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_in_sync(&self) -> bool {
        self.state == SyncState::InSync
    }

    /// Record a peer's claimed height, possibly entering `Catchup`.
    pub fn observe_peer_height(&mut self, local_height: u64, peer_height: u64) {
        if peer_height > self.known_height {
            self.known_height = peer_height;
        }
        self.state = if self.known_height > local_height {
            SyncState::Catchup
        } else {
            SyncState::InSync
        };
    }

    /// Build the next `SyncRequest` to issue, if we're behind and haven't
    /// already asked for this height.
    pub fn next_request(&mut self, local_height: u64) -> Option<SyncRequest> {
        if self.state != SyncState::Catchup {
            return None;
        }
        let from_height = local_height + 1;
        if from_height <= self.last_requested_height {
            return None;
        }
        self.last_requested_height = from_height;
        self.expected_height = self.known_height;
        Some(SyncRequest::new(from_height))
    }

    /// Call once a locally-applied block brings us up to `known_height`.
    pub fn note_height_applied(&mut self, local_height: u64) {
        if local_height >= self.known_height {
            self.state = SyncState::InSync;
        }
    }
}
