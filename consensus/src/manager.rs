//! `ConsensusManager` — the phase machine driving PRE-PREPARE / PREPARE /
//! COMMIT plus ROUND-CHANGE.
//!
//! All mutation of the per-height state and the proposer rotation happens
//! under one coarse lock, so phase transitions are atomic with respect to
//! each other (see SPEC_FULL.md §7). The manager performs no I/O itself
//! beyond the injected [`BlockStore`] and an outbound event channel — it is
//! pure CPU work between those edges.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::contracts::BlockStore;
use crate::error::ConsensusError;
use crate::types::{
    self, ConsensusState, Hash, Phase, Proposal, RotationState, SignedBlock, ValidatorSet, View,
    Vote, VoteKind,
};
use crate::verifier;
use crypto::Keypair;

/// Outbound side effects: broadcasts, finality notification, and
/// round-change timer (re)scheduling. The manager never touches the network
/// or a wall clock directly — see the "timer/IO coupling" redesign note.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    BroadcastProposal(Proposal),
    BroadcastVote(Vote),
    BlockFinalized { height: u64, block_id: Hash },
    ResetRoundChangeTimer { height: u64, round: u64, timeout: Duration },
}

/// Result of processing one inbound message or round-change trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Continue,
    Ignored,
    RoundChanged { round: u64 },
    Finalized { height: u64, block_id: Hash },
}

struct Inner {
    state: Option<ConsensusState>,
    rotation: RotationState,
}

pub struct ConsensusManager {
    config: ConsensusConfig,
    validator_set: ValidatorSet,
    self_validator: crate::types::Validator,
    keypair: Keypair,
    max_faulty: u64,
    inner: RwLock<Inner>,
    block_store: Arc<dyn BlockStore>,
    event_tx: mpsc::UnboundedSender<ConsensusEvent>,
}

impl ConsensusManager {
    pub fn new(
        config: ConsensusConfig,
        validator_set: ValidatorSet,
        keypair: Keypair,
        block_store: Arc<dyn BlockStore>,
        event_tx: mpsc::UnboundedSender<ConsensusEvent>,
    ) -> Result<Self, ConsensusError> {
        let self_validator = validator_set.self_validator().clone();
        if self_validator.public_key != keypair.public_key() {
            return Err(ConsensusError::Fatal {
                reason: "local keypair does not match the self validator's public key"
                    .to_string(),
            });
        }
        let max_faulty = validator_set.max_faulty();
        Ok(Self {
            config,
            validator_set,
            self_validator,
            keypair,
            max_faulty,
            inner: RwLock::new(Inner {
                state: None,
                rotation: RotationState::new(),
            }),
            block_store,
            event_tx,
        })
    }

    pub fn quorum_threshold(&self) -> u64 {
        2 * self.max_faulty + 1
    }

    pub fn fast_forward_threshold(&self) -> u64 {
        self.max_faulty + 1
    }

    pub async fn view(&self) -> Option<View> {
        self.inner.read().await.state.as_ref().map(|s| s.view)
    }

    pub async fn phase(&self) -> Option<Phase> {
        self.inner.read().await.state.as_ref().map(|s| s.phase)
    }

    pub async fn is_locked(&self) -> bool {
        self.inner
            .read()
            .await
            .state
            .as_ref()
            .map(|s| s.is_locked())
            .unwrap_or(false)
    }

    pub async fn is_self_proposer(&self) -> bool {
        let guard = self.inner.read().await;
        guard.rotation.is_proposer(&self.validator_set, &self.self_validator)
    }

    /// Bootstrap the manager against the block store's current head.
    pub async fn start(&self) -> Result<(), ConsensusError> {
        self.start_new_round(0).await
    }

    /// Called by the leader with a freshly assembled block to propose.
    pub async fn send_proposal(&self, block: SignedBlock) -> ProcessResult {
        let Some(view) = self.view().await else {
            return ProcessResult::Ignored;
        };
        let proposal = Proposal {
            view,
            sender: self.self_validator.clone(),
            block,
        };
        let result = self.on_proposal(proposal.clone()).await;
        let _ = self
            .event_tx
            .send(ConsensusEvent::BroadcastProposal(proposal));
        result
    }

    pub async fn on_proposal(&self, proposal: Proposal) -> ProcessResult {
        let Some(current_view) = self.view().await else {
            return ProcessResult::Ignored;
        };
        if proposal.view != current_view {
            debug!(
                proposal_view = %proposal.view,
                state_view = %current_view,
                "ignoring proposal outside the current view"
            );
            return ProcessResult::Ignored;
        }

        let is_expected_proposer = {
            let guard = self.inner.read().await;
            guard
                .rotation
                .is_proposer(&self.validator_set, &proposal.sender)
        };

        let Some(head) = self.block_store.head().await else {
            warn!("no chain head available while verifying a proposal");
            return ProcessResult::Ignored;
        };

        if let Err(err) = verifier::verify_proposal(&proposal, &head, is_expected_proposer) {
            warn!(%err, "rejecting proposal, requesting round change");
            self.send_round_change(current_view.round + 1).await;
            return ProcessResult::Ignored;
        }

        let mut guard = self.inner.write().await;
        let Some(state) = guard.state.as_mut() else {
            return ProcessResult::Ignored;
        };
        if state.view != current_view || state.phase != Phase::NewRound {
            // View moved on, or we already acted on a proposal this view.
            return ProcessResult::Ignored;
        }

        if state.is_locked() && state.locked_height_id == proposal.block_height_id() {
            state.set_proposal(proposal);
            state.set_phase(Phase::Prepared);
            drop(guard);
            self.send_vote(VoteKind::Commit).await
        } else if state.is_locked() {
            drop(guard);
            self.send_round_change(current_view.round + 1).await;
            ProcessResult::Continue
        } else {
            state.set_proposal(proposal);
            state.set_phase(Phase::PrePrepared);
            drop(guard);
            self.send_vote(VoteKind::Prepare).await
        }
    }

    pub async fn on_prepare(&self, vote: Vote) -> ProcessResult {
        let mut guard = self.inner.write().await;
        let Some(state) = guard.state.as_mut() else {
            return ProcessResult::Ignored;
        };

        if let Err(err) = verifier::verify_vote(&vote, state) {
            debug!(%err, "dropping prepare vote");
            return ProcessResult::Ignored;
        }
        if let Err(err) = state.apply_vote(vote, &self.validator_set) {
            debug!(%err, "dropping prepare vote");
            return ProcessResult::Ignored;
        }

        let not_yet_prepared = state.phase < Phase::Prepared;
        let locked_matches_proposal = state.is_locked()
            && state
                .proposal
                .as_ref()
                .map(|p| p.block_height_id() == state.locked_height_id)
                .unwrap_or(false);
        let quorum_reached = state.prepare_votes.size() as u64 >= self.quorum_threshold();

        if not_yet_prepared && (locked_matches_proposal || quorum_reached) {
            state.lock();
            state.set_phase(Phase::Prepared);
            drop(guard);
            return self.send_vote(VoteKind::Commit).await;
        }

        ProcessResult::Continue
    }

    pub async fn on_commit(&self, vote: Vote) -> ProcessResult {
        let mut guard = self.inner.write().await;
        let Some(state) = guard.state.as_mut() else {
            return ProcessResult::Ignored;
        };

        if let Err(err) = verifier::verify_vote(&vote, state) {
            debug!(%err, "dropping commit vote");
            return ProcessResult::Ignored;
        }
        if let Err(err) = state.apply_vote(vote, &self.validator_set) {
            debug!(%err, "dropping commit vote");
            return ProcessResult::Ignored;
        }

        if state.phase < Phase::Committed && state.commit_votes.size() as u64 >= self.quorum_threshold()
        {
            state.lock();
            state.set_phase(Phase::Committed);
            let proposal = state.proposal.clone();
            let commits: Vec<Vote> = state.commit_votes.votes().cloned().collect();
            drop(guard);
            return self.commit_block(proposal, commits).await;
        }

        ProcessResult::Continue
    }

    async fn commit_block(&self, proposal: Option<Proposal>, commits: Vec<Vote>) -> ProcessResult {
        let Some(proposal) = proposal else {
            return ProcessResult::Ignored;
        };
        let mut block = proposal.block.block.clone();
        block.commits = commits;
        let height = block.header.height_id.height;
        let block_id = block.header.height_id.id;

        match self.block_store.add_block(block).await {
            Ok(()) => {
                info!(height, %block_id, "block committed");
                let _ = self
                    .event_tx
                    .send(ConsensusEvent::BlockFinalized { height, block_id });
                if let Err(err) = self.start_new_round(0).await {
                    warn!(%err, "fatal error starting next height after commit");
                }
                ProcessResult::Finalized { height, block_id }
            }
            Err(err) => {
                warn!(%err, "block store rejected commit, unlocking and advancing round");
                let round = {
                    let mut guard = self.inner.write().await;
                    let round = guard.state.as_ref().map(|s| s.view.round).unwrap_or(0);
                    if let Some(state) = guard.state.as_mut() {
                        state.unlock();
                    }
                    round
                };
                self.send_round_change(round + 1).await;
                ProcessResult::Ignored
            }
        }
    }

    pub async fn on_round_change(&self, vote: Vote) -> ProcessResult {
        let mut guard = self.inner.write().await;
        let Some(state) = guard.state.as_mut() else {
            return ProcessResult::Ignored;
        };

        if let Err(err) = verifier::verify_round_change(&vote, state) {
            debug!(%err, "dropping round-change vote");
            return ProcessResult::Ignored;
        }

        let target_round = vote.view.round;
        if let Err(err) = state.apply_round_change(vote, &self.validator_set) {
            debug!(%err, "dropping round-change vote");
            return ProcessResult::Ignored;
        }

        let count = state
            .round_changes
            .get(&target_round)
            .map(|s| s.size() as u64)
            .unwrap_or(0);
        let phase = state.phase;
        let current_round = state.view.round;
        drop(guard);

        if phase == Phase::RoundChange
            && count == self.fast_forward_threshold()
            && current_round < target_round
        {
            self.send_round_change(target_round).await;
            return ProcessResult::RoundChanged { round: target_round };
        }

        if count == self.quorum_threshold() && (phase == Phase::RoundChange || current_round < target_round)
        {
            if let Err(err) = self.start_new_round(target_round).await {
                warn!(%err, "fatal error starting new round");
            }
            return ProcessResult::RoundChanged { round: target_round };
        }

        ProcessResult::Continue
    }

    /// Round-change timer fired.
    pub async fn on_timeout(&self) {
        let Some((phase, round, height)) = ({
            let guard = self.inner.read().await;
            guard.state.as_ref().map(|s| (s.phase, s.view.round, s.view.height))
        }) else {
            return;
        };
        warn!(height, round, %phase, "round-change timer fired");

        if phase != Phase::RoundChange {
            let max_round = {
                let guard = self.inner.read().await;
                guard
                    .state
                    .as_ref()
                    .and_then(|s| s.get_max_round(self.fast_forward_threshold()))
            };
            if let Some(max_round) = max_round {
                if max_round > round {
                    self.send_round_change(max_round).await;
                    return;
                }
            }
        }

        let caught_up = self
            .block_store
            .head()
            .await
            .map(|h| h.header.height_id.height + 1 >= height)
            .unwrap_or(false);
        if caught_up {
            if let Err(err) = self.start_new_round(0).await {
                warn!(%err, "fatal error restarting round after timeout");
            }
            return;
        }

        self.send_round_change(round + 1).await;
    }

    async fn send_round_change(&self, round: u64) {
        let Some(height) = self.view().await.map(|v| v.height) else {
            return;
        };
        self.change_view(View::new(height, round)).await;
        self.send_vote(VoteKind::RoundChange).await;
    }

    async fn change_view(&self, new_view: View) {
        {
            let mut guard = self.inner.write().await;
            if let Some(state) = guard.state.as_mut() {
                state.set_phase(Phase::RoundChange);
                state.update_view(new_view);
            }
        }
        let timeout = self.config.round_change_timeout_for_round(new_view.round);
        let _ = self.event_tx.send(ConsensusEvent::ResetRoundChangeTimer {
            height: new_view.height,
            round: new_view.round,
            timeout,
        });
    }

    /// Build, sign, locally apply (local-first fan-in), and broadcast a vote.
    /// Returns the result of applying the vote locally, so callers that
    /// trigger a vote as a side effect of processing a message (e.g.
    /// `on_proposal` sending a Prepare) can propagate what actually happened.
    async fn send_vote(&self, kind: VoteKind) -> ProcessResult {
        let Some((view, block_id)) = ({
            let guard = self.inner.read().await;
            guard.state.as_ref().map(|s| {
                let block_id = match kind {
                    VoteKind::RoundChange => Hash::EMPTY,
                    _ => s.proposal.as_ref().map(|p| p.block_id()).unwrap_or(Hash::EMPTY),
                };
                (s.view, block_id)
            })
        }) else {
            return ProcessResult::Ignored;
        };

        let address = self.self_validator.address.clone();
        let payload = types::vote_signing_payload(kind, view, block_id, &address);
        let digest = Hash::of(&payload);
        let signature = self.keypair.sign(&digest.0);
        let vote = Vote {
            digest,
            address,
            kind,
            view,
            block_id,
            signature,
        };

        let result = match kind {
            VoteKind::Prepare => self.on_prepare(vote.clone()).await,
            VoteKind::Commit => self.on_commit(vote.clone()).await,
            VoteKind::RoundChange => self.on_round_change(vote.clone()).await,
        };
        let _ = self.event_tx.send(ConsensusEvent::BroadcastVote(vote));
        result
    }

    async fn start_new_round(&self, round: u64) -> Result<(), ConsensusError> {
        let head = self.block_store.head().await.ok_or_else(|| ConsensusError::Fatal {
            reason: "block store has no genesis block".to_string(),
        })?;

        let mut guard = self.inner.write().await;
        let head_height = head.header.height_id.height;
        let mut new_view = View::new(head_height + 1, 0);

        let replace_with_fresh = match &guard.state {
            None => true,
            Some(state) => {
                if head_height >= state.view.height {
                    true
                } else if head_height == state.view.height - 1 {
                    if round == 0 {
                        // no-op, stays at round 0
                    } else if round < state.view.round {
                        warn!(
                            round,
                            current_round = state.view.round,
                            "rejecting round-change request for a round already passed"
                        );
                        return Ok(());
                    } else {
                        new_view = new_view.with_round(round);
                    }
                    false
                } else {
                    warn!(
                        head_height,
                        state_height = state.view.height,
                        "new height should be greater than current height"
                    );
                    new_view = state.view;
                    false
                }
            }
        };

        if replace_with_fresh {
            guard.state = Some(ConsensusState::new(new_view));
        }

        let proposer_index = guard.rotation.calculate_proposer(&self.validator_set, round);

        let state = guard.state.as_mut().expect("state initialized above");
        state.round_changes.clear();
        state.update_view(new_view);
        state.set_phase(Phase::NewRound);

        info!(view = %state.view, "starting new round");

        let is_self_proposer = self
            .validator_set
            .get_by_index(proposer_index)
            .map(|v| v.address == self.self_validator.address)
            .unwrap_or(false);
        let resend_locked = new_view.round != 0 && is_self_proposer && state.is_locked();
        let locked_proposal = if resend_locked {
            state.proposal.clone()
        } else {
            None
        };
        let timeout = self.config.round_change_timeout_for_round(new_view.round);
        drop(guard);

        if let Some(proposal) = locked_proposal {
            let _ = self
                .event_tx
                .send(ConsensusEvent::BroadcastProposal(proposal));
        }
        let _ = self.event_tx.send(ConsensusEvent::ResetRoundChangeTimer {
            height: new_view.height,
            round: new_view.round,
            timeout,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeightId, Block, Header, Validator};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct MemoryBlockStore {
        head: Mutex<Block>,
    }

    impl MemoryBlockStore {
        fn new(genesis: Block) -> Self {
            Self {
                head: Mutex::new(genesis),
            }
        }
    }

    #[async_trait]
    impl BlockStore for MemoryBlockStore {
        async fn head(&self) -> Option<Block> {
            Some(self.head.lock().await.clone())
        }

        async fn add_block(&self, block: Block) -> Result<(), ConsensusError> {
            let mut head = self.head.lock().await;
            if block.header.height_id.height != head.header.height_id.height + 1 {
                return Err(ConsensusError::UnlinkableBlock);
            }
            *head = block;
            Ok(())
        }
    }

    fn genesis() -> (Block, Keypair, Validator) {
        let keypair = Keypair::generate();
        let proposer = Validator::new(keypair.public_key());
        let header = Header {
            height_id: BlockHeightId::new(1, Hash::of(b"genesis")),
            previous_id: Hash::EMPTY,
            proposer: proposer.clone(),
            timestamp_nanos: 0,
        };
        (
            Block {
                header,
                commits: Vec::new(),
            },
            keypair,
            proposer,
        )
    }

    fn signed_child(head: &Block, keypair: &Keypair, proposer: &Validator) -> SignedBlock {
        let header = Header {
            height_id: BlockHeightId::new(head.header.height_id.height + 1, Hash::of(b"child")),
            previous_id: head.header.height_id.id,
            proposer: proposer.clone(),
            timestamp_nanos: 1,
        };
        let digest = header.hash();
        let signature = keypair.sign(&digest.0);
        SignedBlock {
            block: Block {
                header,
                commits: Vec::new(),
            },
            signature,
        }
    }

    #[tokio::test]
    async fn single_validator_commits_its_own_proposal() {
        let (genesis_block, keypair, proposer) = genesis();
        let validator_set = ValidatorSet::new(vec![proposer.clone()], &proposer.address).unwrap();
        let store = Arc::new(MemoryBlockStore::new(genesis_block.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let block = signed_child(&genesis_block, &keypair, &proposer);
        let manager = ConsensusManager::new(
            ConsensusConfig::default(),
            validator_set,
            keypair,
            store,
            tx,
        )
        .expect("manager construction should succeed");

        manager.start().await.expect("bootstrap should succeed");
        assert_eq!(manager.view().await, Some(View::new(2, 0)));

        let result = manager.send_proposal(block).await;
        assert_eq!(
            result,
            ProcessResult::Finalized {
                height: 2,
                block_id: Hash::of(b"child"),
            }
        );

        // Next height is ready to go.
        assert_eq!(manager.view().await, Some(View::new(3, 0)));
        assert_eq!(manager.phase().await, Some(Phase::NewRound));

        // Drain a few events; there should be at least a broadcast + finality.
        let mut saw_finalized = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ConsensusEvent::BlockFinalized { height: 2, .. }) {
                saw_finalized = true;
            }
        }
        assert!(saw_finalized);
    }
}
