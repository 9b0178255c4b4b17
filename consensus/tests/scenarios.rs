//! End-to-end scenarios driving several `ConsensusManager` instances at
//! once, wiring their emitted events back into each other's inboxes in
//! place of a real network. Each validator keeps its own block store, as
//! it would in a real deployment.

use std::sync::Arc;

use async_trait::async_trait;
use consensus::types::{
    vote_signing_payload, Block, BlockHeightId, Header, Proposal, SignedBlock, Validator,
};
use consensus::{
    BlockStore, ConsensusConfig, ConsensusError, ConsensusEvent, ConsensusManager, Hash,
    ProcessResult, ValidatorSet, View, Vote, VoteKind,
};
use crypto::Keypair;
use tokio::sync::{mpsc, Mutex};

struct MemoryBlockStore {
    head: Mutex<Block>,
    fail_add: bool,
}

impl MemoryBlockStore {
    fn new(genesis: Block) -> Self {
        Self { head: Mutex::new(genesis), fail_add: false }
    }

    fn failing(genesis: Block) -> Self {
        Self { head: Mutex::new(genesis), fail_add: true }
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn head(&self) -> Option<Block> {
        Some(self.head.lock().await.clone())
    }

    async fn add_block(&self, block: Block) -> Result<(), ConsensusError> {
        if self.fail_add {
            return Err(ConsensusError::UnlinkableBlock);
        }
        let mut head = self.head.lock().await;
        if block.header.height_id.height != head.header.height_id.height + 1 {
            return Err(ConsensusError::UnlinkableBlock);
        }
        *head = block;
        Ok(())
    }
}

fn genesis_block(proposer: Validator) -> Block {
    Block {
        header: Header {
            height_id: BlockHeightId::new(1, Hash::of(b"genesis")),
            previous_id: Hash::EMPTY,
            proposer,
            timestamp_nanos: 0,
        },
        commits: Vec::new(),
    }
}

struct HarnessNode {
    manager: Arc<ConsensusManager>,
    event_rx: mpsc::UnboundedReceiver<ConsensusEvent>,
}

/// Each validator's address plus a `Keypair` the test harness keeps for
/// itself, independent of the one each validator's manager consumes, both
/// derived from the same fixed per-index secret.
fn identities_with_secrets(n: usize) -> Vec<([u8; 32], Validator, Keypair)> {
    (0..n)
        .map(|i| {
            let mut secret = [0u8; 32];
            secret[0] = (i + 1) as u8;
            secret[31] = 0xAB;
            let harness_keypair = Keypair::from_bytes(&secret).unwrap();
            let validator = Validator::new(harness_keypair.public_key());
            (secret, validator, harness_keypair)
        })
        .collect()
}

async fn setup(n: usize) -> (Vec<HarnessNode>, Vec<([u8; 32], Validator, Keypair)>, Block) {
    let identities = identities_with_secrets(n);
    let validators: Vec<Validator> = identities.iter().map(|(_, v, _)| v.clone()).collect();
    let genesis = genesis_block(validators[0].clone());

    let mut nodes = Vec::new();
    for (secret, validator, _) in &identities {
        let manager_keypair = Keypair::from_bytes(secret).unwrap();
        let validator_set = ValidatorSet::new(validators.clone(), &validator.address).unwrap();
        let store = Arc::new(MemoryBlockStore::new(genesis.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(
            ConsensusManager::new(ConsensusConfig::default(), validator_set, manager_keypair, store, tx)
                .unwrap(),
        );
        nodes.push(HarnessNode { manager, event_rx: rx });
    }

    (nodes, identities, genesis)
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
    SignedBlock { block: Block { header, commits: Vec::new() }, signature }
}

fn round_change_vote(view: View, address: &str, keypair: &Keypair) -> Vote {
    let payload = vote_signing_payload(VoteKind::RoundChange, view, Hash::EMPTY, address);
    let digest = Hash::of(&payload);
    Vote {
        digest,
        address: address.to_string(),
        kind: VoteKind::RoundChange,
        view,
        block_id: Hash::EMPTY,
        signature: keypair.sign(&digest.0),
    }
}

/// Drain every node's event queue, delivering `BroadcastProposal` and
/// `BroadcastVote` events to every node (including their originator, which
/// simply deduplicates them), until no more events are produced. Returns
/// every `BlockFinalized` event observed along the way.
async fn pump(nodes: &mut [HarnessNode]) -> Vec<ConsensusEvent> {
    let mut finalized = Vec::new();
    loop {
        let mut batch = Vec::new();
        for node in nodes.iter_mut() {
            while let Ok(event) = node.event_rx.try_recv() {
                batch.push(event);
            }
        }
        if batch.is_empty() {
            break;
        }
        for event in batch {
            if let ConsensusEvent::BlockFinalized { .. } = &event {
                finalized.push(event.clone());
            }
            deliver(nodes, event).await;
        }
    }
    finalized
}

async fn deliver(nodes: &[HarnessNode], event: ConsensusEvent) {
    match event {
        ConsensusEvent::BroadcastProposal(proposal) => {
            for node in nodes {
                node.manager.on_proposal(proposal.clone()).await;
            }
        }
        ConsensusEvent::BroadcastVote(vote) => {
            for node in nodes {
                match vote.kind {
                    VoteKind::Prepare => {
                        node.manager.on_prepare(vote.clone()).await;
                    }
                    VoteKind::Commit => {
                        node.manager.on_commit(vote.clone()).await;
                    }
                    VoteKind::RoundChange => {
                        node.manager.on_round_change(vote.clone()).await;
                    }
                };
            }
        }
        ConsensusEvent::BlockFinalized { .. } | ConsensusEvent::ResetRoundChangeTimer { .. } => {}
    }
}

#[tokio::test]
async fn happy_path_commit_reaches_quorum_across_four_validators() {
    let (mut nodes, identities, genesis) = setup(4).await;
    for node in &nodes {
        node.manager.start().await.unwrap();
    }

    let mut proposer_idx = None;
    for (i, node) in nodes.iter().enumerate() {
        if node.manager.is_self_proposer().await {
            proposer_idx = Some(i);
        }
    }
    let proposer_idx = proposer_idx.expect("exactly one proposer for round 0");
    let (_, proposer_validator, proposer_keypair) = &identities[proposer_idx];

    let block = signed_child(&genesis, proposer_keypair, proposer_validator);
    nodes[proposer_idx].manager.send_proposal(block).await;

    let finalized = pump(&mut nodes).await;

    // All four validators finalize the same block at height 2.
    assert_eq!(finalized.len(), 4);
    for event in finalized {
        match event {
            ConsensusEvent::BlockFinalized { height, block_id } => {
                assert_eq!(height, 2);
                assert_eq!(block_id, Hash::of(b"child"));
            }
            _ => unreachable!(),
        }
    }
    for node in &nodes {
        assert_eq!(node.manager.view().await.unwrap(), View::new(3, 0));
    }
}

#[tokio::test]
async fn quorum_round_change_votes_advance_every_validator_to_the_new_round() {
    let (nodes, identities, _genesis) = setup(4).await;
    for node in &nodes {
        node.manager.start().await.unwrap();
    }
    let view = nodes[0].manager.view().await.unwrap();
    let target = View::new(view.height, view.round + 1);

    // Three of the four validators (a 2f+1 quorum for f=1) independently
    // decide the round 0 proposer is absent and vote to move to round 1.
    for (_, validator, keypair) in identities.iter().take(3) {
        let vote = round_change_vote(target, &validator.address, keypair);
        for node in &nodes {
            node.manager.on_round_change(vote.clone()).await;
        }
    }

    for node in &nodes {
        assert_eq!(node.manager.view().await.unwrap().round, 1);
    }
}

#[tokio::test]
async fn a_locked_proposal_is_resent_when_its_proposer_leads_the_next_round() {
    let (mut nodes, identities, genesis) = setup(4).await;
    for node in &nodes {
        node.manager.start().await.unwrap();
    }

    let proposer_idx = {
        let mut found = None;
        for (i, node) in nodes.iter().enumerate() {
            if node.manager.is_self_proposer().await {
                found = Some(i);
            }
        }
        found.unwrap()
    };
    let (_, proposer_validator, proposer_keypair) = &identities[proposer_idx];
    let block = signed_child(&genesis, proposer_keypair, proposer_validator);
    let block_id = block.block_id();

    nodes[proposer_idx].manager.send_proposal(block).await;

    // Deliver only the proposal and the Prepare votes (reaching the lock),
    // stopping short of a full commit so every validator ends up locked
    // on the same block without finalizing it.
    loop {
        let mut batch = Vec::new();
        for node in nodes.iter_mut() {
            while let Ok(event) = node.event_rx.try_recv() {
                batch.push(event);
            }
        }
        if batch.is_empty() {
            break;
        }
        for event in batch {
            match event {
                ConsensusEvent::BroadcastProposal(p) => {
                    for node in &nodes {
                        node.manager.on_proposal(p.clone()).await;
                    }
                }
                ConsensusEvent::BroadcastVote(v) if v.kind == VoteKind::Prepare => {
                    for node in &nodes {
                        node.manager.on_prepare(v.clone()).await;
                    }
                }
                _ => {}
            }
        }
        if nodes[0].manager.is_locked().await {
            break;
        }
    }
    for node in &nodes {
        assert!(node.manager.is_locked().await);
    }

    // Now force a round change; whichever validator proposes round 1
    // should resend its lock.
    let view = nodes[0].manager.view().await.unwrap();
    let target = View::new(view.height, view.round + 1);
    for (_, validator, keypair) in identities.iter().take(3) {
        let vote = round_change_vote(target, &validator.address, keypair);
        for node in &nodes {
            node.manager.on_round_change(vote.clone()).await;
        }
    }

    let mut resent = false;
    for node in nodes.iter_mut() {
        while let Ok(event) = node.event_rx.try_recv() {
            if let ConsensusEvent::BroadcastProposal(p) = event {
                assert_eq!(p.block_id(), block_id);
                resent = true;
            }
        }
    }
    assert!(resent, "the round-1 proposer should resend its locked proposal");
}

#[tokio::test]
async fn a_duplicate_vote_from_the_same_validator_is_rejected() {
    let (nodes, identities, genesis) = setup(4).await;
    for node in &nodes {
        node.manager.start().await.unwrap();
    }

    let proposer_idx = {
        let mut found = None;
        for (i, node) in nodes.iter().enumerate() {
            if node.manager.is_self_proposer().await {
                found = Some(i);
            }
        }
        found.unwrap()
    };
    let (_, proposer_validator, proposer_keypair) = &identities[proposer_idx];
    let block = signed_child(&genesis, proposer_keypair, proposer_validator);
    let view = nodes[0].manager.view().await.unwrap();
    let proposal = Proposal { view, sender: proposer_validator.clone(), block };

    // Deliver the proposal to a non-proposer validator, which casts one
    // Prepare vote as a side effect.
    let voter_idx = (proposer_idx + 1) % nodes.len();
    nodes[voter_idx].manager.on_proposal(proposal.clone()).await;

    let (_, byzantine_validator, byzantine_keypair) = &identities[(proposer_idx + 2) % nodes.len()];
    let payload = vote_signing_payload(VoteKind::Prepare, view, proposal.block_id(), &byzantine_validator.address);
    let digest = Hash::of(&payload);
    let honest_vote = Vote {
        digest,
        address: byzantine_validator.address.clone(),
        kind: VoteKind::Prepare,
        view,
        block_id: proposal.block_id(),
        signature: byzantine_keypair.sign(&digest.0),
    };
    let first = nodes[voter_idx].manager.on_prepare(honest_vote.clone()).await;
    assert_ne!(first, ProcessResult::Ignored);

    // The same validator votes again for a different block in the same
    // view — the duplicate must be rejected, not counted twice.
    let other_payload = vote_signing_payload(VoteKind::Prepare, view, Hash::of(b"other"), &byzantine_validator.address);
    let other_digest = Hash::of(&other_payload);
    let duplicate_vote = Vote {
        digest: other_digest,
        address: byzantine_validator.address.clone(),
        kind: VoteKind::Prepare,
        view,
        block_id: Hash::of(b"other"),
        signature: byzantine_keypair.sign(&other_digest.0),
    };
    let second = nodes[voter_idx].manager.on_prepare(duplicate_vote).await;
    assert_eq!(second, ProcessResult::Ignored);
}

#[tokio::test]
async fn a_proposal_from_a_future_view_is_ignored() {
    let (nodes, identities, genesis) = setup(4).await;
    for node in &nodes {
        node.manager.start().await.unwrap();
    }

    let current_view = nodes[0].manager.view().await.unwrap();
    let future_view = View::new(current_view.height + 5, 0);
    let (_, some_validator, some_keypair) = &identities[0];
    let block = signed_child(&genesis, some_keypair, some_validator);
    let proposal = Proposal { view: future_view, sender: some_validator.clone(), block };

    let result = nodes[0].manager.on_proposal(proposal).await;
    assert_eq!(result, ProcessResult::Ignored);
    assert_eq!(nodes[0].manager.view().await.unwrap(), current_view);
}

#[tokio::test]
async fn a_block_store_rejection_unlocks_and_requests_a_round_change() {
    let identities = identities_with_secrets(1);
    let (secret, validator, _) = &identities[0];
    let genesis = genesis_block(validator.clone());

    let manager_keypair = Keypair::from_bytes(secret).unwrap();
    let harness_keypair = Keypair::from_bytes(secret).unwrap();
    let validator_set = ValidatorSet::new(vec![validator.clone()], &validator.address).unwrap();
    let store = Arc::new(MemoryBlockStore::failing(genesis.clone()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = ConsensusManager::new(ConsensusConfig::default(), validator_set, manager_keypair, store, tx)
        .unwrap();

    manager.start().await.unwrap();
    let block = signed_child(&genesis, &harness_keypair, validator);

    let result = manager.send_proposal(block).await;
    assert_eq!(result, ProcessResult::Ignored);
    assert!(!manager.is_locked().await);

    let mut saw_round_change_vote = false;
    while let Ok(event) = rx.try_recv() {
        if let ConsensusEvent::BroadcastVote(vote) = event {
            if vote.kind == VoteKind::RoundChange {
                saw_round_change_vote = true;
            }
        }
    }
    assert!(saw_round_change_vote, "a failed commit should trigger a round-change vote");
}
