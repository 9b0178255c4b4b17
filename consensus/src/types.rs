//! Core consensus data types.
//!
//! - Block identity (`Hash`, `BlockHeightId`) and ordered view (`View`)
//! - Validator membership and proposer rotation
//! - Typed votes and per-view vote aggregation
//! - Per-height mutable state (`ConsensusState`)
//! - Block/proposal shapes

use crypto::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::ConsensusError;

/// A 32-byte digest. All-zero is the distinguished "empty" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const EMPTY: Hash = Hash([0u8; 32]);

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// SHA-256 of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// `(height, id)` pair identifying a specific block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockHeightId {
    pub height: u64,
    pub id: Hash,
}

impl Default for Hash {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BlockHeightId {
    pub fn new(height: u64, id: Hash) -> Self {
        Self { height, id }
    }

    /// `valid` iff `height > 0` and `id` is not the empty hash.
    pub fn valid(&self) -> bool {
        self.height > 0 && !self.id.is_empty()
    }
}

/// `(height, round)` pair totally ordered by height first, then round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub height: u64,
    pub round: u64,
}

impl View {
    pub fn new(height: u64, round: u64) -> Self {
        Self { height, round }
    }

    pub fn with_round(self, round: u64) -> Self {
        Self { round, ..self }
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for View {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.height.cmp(&other.height).then(self.round.cmp(&other.round))
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(height={}, round={})", self.height, self.round)
    }
}

/// A validator identity: an address (derived from the public key) plus the
/// public key itself. Equality considers both fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    pub public_key: PublicKey,
}

impl Validator {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            address: public_key.address(),
            public_key,
        }
    }

    pub fn from_address(address: String, public_key: PublicKey) -> Self {
        Self { address, public_key }
    }
}

/// An immutable, address-sorted set of validators, with a designated local
/// identity. The proposer cursor is NOT stored here — see [`RotationState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    self_index: usize,
}

impl ValidatorSet {
    /// Build a sorted validator set. Fails fatally (per spec.md §7: missing
    /// local identity at construction is a fatal condition) if `self_address`
    /// is not a member.
    pub fn new(mut validators: Vec<Validator>, self_address: &str) -> Result<Self, ConsensusError> {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        let self_index = validators
            .iter()
            .position(|v| v.address == self_address)
            .ok_or_else(|| ConsensusError::Fatal {
                reason: format!("self address {self_address} is not a member of the validator set"),
            })?;
        Ok(Self {
            validators,
            self_index,
        })
    }

    pub fn size(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn get_by_address(&self, address: &str) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .position(|v| v.address == address)
            .map(|i| (i, &self.validators[i]))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn self_validator(&self) -> &Validator {
        &self.validators[self.self_index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// `f = floor(N/3)`, the maximum tolerated Byzantine fault count.
    pub fn max_faulty(&self) -> u64 {
        (self.size() as u64) / 3
    }

    /// `2f + 1`.
    pub fn quorum_threshold(&self) -> u64 {
        2 * self.max_faulty() + 1
    }

    /// `f + 1`, the round-change fast-forward threshold.
    pub fn fast_forward_threshold(&self) -> u64 {
        self.max_faulty() + 1
    }
}

/// The mutable proposer cursor, moved out of `ValidatorSet` per the
/// "mutable current proposer inside the validator set" redesign note:
/// membership stays an immutable set, and `calculate_proposer` is a pure
/// function of `(current cursor, round)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationState {
    proposer_index: Option<usize>,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic round-robin-with-skip: if no proposer has been set yet,
    /// `proposer = validators[round mod N]`; otherwise `proposer =
    /// validators[(index_of(current_proposer) + round + 1) mod N]`.
    pub fn calculate_proposer(&mut self, validator_set: &ValidatorSet, round: u64) -> usize {
        let n = validator_set.size() as u64;
        let offset = match self.proposer_index {
            None => round,
            Some(idx) => idx as u64 + round + 1,
        };
        let new_index = (offset % n) as usize;
        self.proposer_index = Some(new_index);
        new_index
    }

    pub fn proposer_index(&self) -> Option<usize> {
        self.proposer_index
    }

    pub fn is_proposer(&self, validator_set: &ValidatorSet, validator: &Validator) -> bool {
        match self.proposer_index.and_then(|i| validator_set.get_by_index(i)) {
            Some(current) => current.address == validator.address,
            None => false,
        }
    }
}

/// A vote's kind. Encoded on the wire as a single tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteKind {
    Prepare,
    Commit,
    RoundChange,
}

/// A single validator's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub digest: Hash,
    pub address: String,
    pub kind: VoteKind,
    pub view: View,
    pub block_id: Hash,
    pub signature: crypto::Signature,
}

/// Canonical encoding used to compute a vote's `digest`: the vote with its
/// `signature` and `digest` fields cleared. Free function so a vote can be
/// signed before the (signed) `Vote` value itself exists.
pub fn vote_signing_payload(kind: VoteKind, view: View, block_id: Hash, address: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"VOTE");
    payload.push(match kind {
        VoteKind::Prepare => 0,
        VoteKind::Commit => 1,
        VoteKind::RoundChange => 2,
    });
    payload.extend_from_slice(&view.height.to_be_bytes());
    payload.extend_from_slice(&view.round.to_be_bytes());
    payload.extend_from_slice(&block_id.0);
    payload.extend_from_slice(address.as_bytes());
    payload
}

impl Vote {
    pub fn signing_payload(&self) -> Vec<u8> {
        vote_signing_payload(self.kind, self.view, self.block_id, &self.address)
    }
}

/// Per-view, per-kind vote aggregation: de-duplicated by voter address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSet {
    pub view: View,
    pub kind: VoteKind,
    votes: HashMap<String, Vote>,
}

impl VoteSet {
    pub fn new(view: View, kind: VoteKind) -> Self {
        Self {
            view,
            kind,
            votes: HashMap::new(),
        }
    }

    /// Insert `vote`, optionally re-verifying it against `validator_set`.
    /// `verify = false` is used for the IBFT "a commit implies a prepare"
    /// shortcut (see [`ConsensusState::apply_vote`]), where the vote has
    /// already been verified once.
    pub fn add_vote(
        &mut self,
        vote: Vote,
        validator_set: &ValidatorSet,
        verify: bool,
    ) -> Result<(), ConsensusError> {
        if verify {
            if vote.kind != self.kind {
                return Err(ConsensusError::TypeMismatch);
            }
            if vote.view != self.view {
                return Err(ConsensusError::ViewMismatch);
            }
            let Some((_, validator)) = validator_set.get_by_address(&vote.address) else {
                return Err(ConsensusError::UnknownVoter);
            };
            if !crypto::verify(&vote.signature, &validator.public_key, &vote.digest.0) {
                return Err(ConsensusError::InvalidSignature);
            }
        }
        if self.votes.contains_key(&vote.address) {
            return Err(ConsensusError::DuplicateVote);
        }
        self.votes.insert(vote.address.clone(), vote);
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.votes.len()
    }

    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }

    /// Rebind this set to a new view. Stored votes are NOT cleared; callers
    /// decide whether to discard the set entirely or carry it forward.
    pub fn change_view(&mut self, new_view: View) {
        self.view = new_view;
    }
}

/// Consensus phase. Advances monotonically within a view; only
/// `RoundChange` resets back to `NewRound` under a new view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    NewRound,
    PrePrepared,
    Prepared,
    Committed,
    FinalCommitted,
    RoundChange,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::NewRound => "NewRound",
            Phase::PrePrepared => "PrePrepared",
            Phase::Prepared => "Prepared",
            Phase::Committed => "Committed",
            Phase::FinalCommitted => "FinalCommitted",
            Phase::RoundChange => "RoundChange",
        };
        write!(f, "{s}")
    }
}

/// Block header. `commits` is populated only at commit time and is excluded
/// from the header hash, so the block identity is stable across that change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub height_id: BlockHeightId,
    pub previous_id: Hash,
    pub proposer: Validator,
    pub timestamp_nanos: u64,
}

impl Header {
    /// Canonical encoding used for hashing; excludes nothing (the header
    /// itself never carries commits).
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"HEADER");
        payload.extend_from_slice(&self.height_id.height.to_be_bytes());
        payload.extend_from_slice(&self.height_id.id.0);
        payload.extend_from_slice(&self.previous_id.0);
        payload.extend_from_slice(self.proposer.address.as_bytes());
        payload.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        payload
    }

    pub fn hash(&self) -> Hash {
        Hash::of(&self.signing_payload())
    }
}

/// A block as tracked by consensus: the header plus the commit votes that
/// finalized it (empty prior to commit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub commits: Vec<Vote>,
}

/// A block with the proposer's signature over its header hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    pub signature: crypto::Signature,
}

impl SignedBlock {
    pub fn block_id(&self) -> Hash {
        self.block.header.hash()
    }

    pub fn block_height_id(&self) -> BlockHeightId {
        BlockHeightId::new(self.block.header.height_id.height, self.block_id())
    }
}

/// A proposal from the round leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub view: View,
    pub sender: Validator,
    pub block: SignedBlock,
}

impl Proposal {
    pub fn block_id(&self) -> Hash {
        self.block.block_id()
    }

    pub fn block_height_id(&self) -> BlockHeightId {
        self.block.block_height_id()
    }

    pub fn proposer(&self) -> &Validator {
        &self.block.block.header.proposer
    }
}

/// Chain genesis identity. A node refuses to start consensus when its
/// locally configured genesis disagrees with the block store's persisted
/// one (see SPEC_FULL.md §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub timestamp_nanos: u64,
    pub proposer: Validator,
    pub validators: Vec<Validator>,
}

impl Genesis {
    /// `chain_id` is the hash of the genesis record.
    pub fn chain_id(&self) -> Hash {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"GENESIS");
        payload.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        payload.extend_from_slice(self.proposer.address.as_bytes());
        for v in &self.validators {
            payload.extend_from_slice(v.address.as_bytes());
        }
        Hash::of(&payload)
    }
}

/// Per-height mutable consensus state.
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub phase: Phase,
    pub view: View,
    pub locked_height_id: BlockHeightId,
    pub proposal: Option<Proposal>,
    pub prepare_votes: VoteSet,
    pub commit_votes: VoteSet,
    pub round_changes: HashMap<u64, VoteSet>,
}

impl ConsensusState {
    pub fn new(view: View) -> Self {
        Self {
            phase: Phase::NewRound,
            view,
            locked_height_id: BlockHeightId::default(),
            proposal: None,
            prepare_votes: VoteSet::new(view, VoteKind::Prepare),
            commit_votes: VoteSet::new(view, VoteKind::Commit),
            round_changes: HashMap::new(),
        }
    }

    pub fn set_phase(&mut self, new_phase: Phase) {
        self.phase = new_phase;
    }

    pub fn set_proposal(&mut self, proposal: Proposal) {
        self.proposal = Some(proposal);
    }

    /// Apply a Prepare or Commit vote. A Commit additionally counts toward
    /// `prepare_votes` unverified — an honest commit implies its sender
    /// already observed a quorum of prepares, so a commit arriving ahead of
    /// the sender's own prepare broadcast still satisfies the threshold.
    pub fn apply_vote(
        &mut self,
        vote: Vote,
        validator_set: &ValidatorSet,
    ) -> Result<(), ConsensusError> {
        match vote.kind {
            VoteKind::Prepare => self.prepare_votes.add_vote(vote, validator_set, true),
            VoteKind::Commit => {
                self.commit_votes
                    .add_vote(vote.clone(), validator_set, true)?;
                let _ = self.prepare_votes.add_vote(vote, validator_set, false);
                Ok(())
            }
            VoteKind::RoundChange => Err(ConsensusError::TypeMismatch),
        }
    }

    pub fn apply_round_change(
        &mut self,
        vote: Vote,
        validator_set: &ValidatorSet,
    ) -> Result<(), ConsensusError> {
        let round = vote.view.round;
        let set = self
            .round_changes
            .entry(round)
            .or_insert_with(|| VoteSet::new(vote.view, VoteKind::RoundChange));
        set.add_vote(vote, validator_set, true)
    }

    /// Copy `proposal`'s height-id into the lock if the proposal is valid.
    /// The lock is monotonic per height; only `unlock()` clears it.
    pub fn lock(&mut self) {
        if let Some(proposal) = &self.proposal {
            let height_id = proposal.block_height_id();
            if height_id.valid() {
                self.locked_height_id = height_id;
            }
        }
    }

    pub fn unlock(&mut self) {
        self.locked_height_id = BlockHeightId::default();
    }

    pub fn is_locked(&self) -> bool {
        self.locked_height_id.valid()
    }

    /// Rebind `view` across the state. Clears `proposal` unless locked.
    pub fn update_view(&mut self, new_view: View) {
        if new_view == self.view {
            return;
        }
        self.view = new_view;
        self.prepare_votes.change_view(new_view);
        self.commit_votes.change_view(new_view);
        for set in self.round_changes.values_mut() {
            set.change_view(new_view);
        }
        if !self.is_locked() {
            self.proposal = None;
        }
    }

    /// Largest round `r` with `round_changes[r].size() >= threshold`, if any.
    pub fn get_max_round(&self, threshold: u64) -> Option<u64> {
        self.round_changes
            .iter()
            .filter(|(_, set)| set.size() as u64 >= threshold)
            .map(|(round, _)| *round)
            .max()
    }
}
