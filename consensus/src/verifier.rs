//! Stateless validation of proposals and votes against the current state.

use crate::error::ConsensusError;
use crate::types::{Block, ConsensusState, Proposal, Vote, VoteKind};

/// Check `p` against the current round's expected proposer, the chain head
/// `H`, and the proposer's signature. Errors are distinct per check so
/// callers can react precisely (an unparseable proposal still triggers a
/// round change at the call site, not a panic).
pub fn verify_proposal(
    proposal: &Proposal,
    head: &Block,
    is_expected_proposer: bool,
) -> Result<(), ConsensusError> {
    if !is_expected_proposer || proposal.proposer().address != proposal.sender.address {
        return Err(ConsensusError::UnknownProposer);
    }

    if !proposal.block_height_id().valid() {
        return Err(ConsensusError::InvalidBlockIdOrHeight);
    }

    let header = &proposal.block.block.header;
    if header.previous_id != head.header.height_id.id
        || header.height_id.height != head.header.height_id.height + 1
    {
        return Err(ConsensusError::UnlinkableBlock);
    }

    let digest = header.hash();
    if !crypto::verify(
        &proposal.block.signature,
        &header.proposer.public_key,
        &digest.0,
    ) {
        return Err(ConsensusError::InvalidProposerSignature);
    }

    Ok(())
}

/// Check a Prepare or Commit vote against the current state. Voter-identity
/// and signature checks happen inside [`crate::types::VoteSet::add_vote`].
pub fn verify_vote(vote: &Vote, state: &ConsensusState) -> Result<(), ConsensusError> {
    debug_assert!(matches!(vote.kind, VoteKind::Prepare | VoteKind::Commit));

    if vote.view != state.view {
        return Err(ConsensusError::ViewMismatch);
    }

    use crate::types::Phase;
    if state.phase == Phase::NewRound {
        return Err(ConsensusError::PhaseNotReady);
    }

    let Some(proposal) = &state.proposal else {
        return Err(ConsensusError::PhaseNotReady);
    };
    if vote.block_id != proposal.block_id() {
        return Err(ConsensusError::BlockIdMismatch);
    }

    Ok(())
}

/// Check a RoundChange vote against the current view. Any vote whose view
/// is behind the current one — same height, stale round, or a past height
/// entirely — is rejected outright; only votes for the current view or
/// later can move consensus forward.
pub fn verify_round_change(vote: &Vote, state: &ConsensusState) -> Result<(), ConsensusError> {
    if vote.view < state.view {
        return Err(ConsensusError::RoundChangeOutOfRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BlockHeightId, Hash, Header, SignedBlock, Validator, View,
    };
    use crypto::Keypair;

    fn genesis_block() -> Block {
        let keypair = Keypair::generate();
        let proposer = Validator::new(keypair.public_key());
        let header = Header {
            height_id: BlockHeightId::new(1, Hash::of(b"genesis")),
            previous_id: Hash::EMPTY,
            proposer,
            timestamp_nanos: 0,
        };
        Block {
            header,
            commits: Vec::new(),
        }
    }

    fn signed_child(head: &Block, keypair: &Keypair) -> SignedBlock {
        let header = Header {
            height_id: BlockHeightId::new(head.header.height_id.height + 1, Hash::of(b"child")),
            previous_id: head.header.height_id.id,
            proposer: Validator::new(keypair.public_key()),
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

    #[test]
    fn accepts_well_linked_proposal() {
        let head = genesis_block();
        let keypair = Keypair::generate();
        let block = signed_child(&head, &keypair);
        let proposal = Proposal {
            view: View::new(2, 0),
            sender: Validator::new(keypair.public_key()),
            block,
        };
        assert!(verify_proposal(&proposal, &head, true).is_ok());
    }

    #[test]
    fn rejects_unlinkable_block() {
        let head = genesis_block();
        let other_head = genesis_block();
        let keypair = Keypair::generate();
        let block = signed_child(&other_head, &keypair);
        let proposal = Proposal {
            view: View::new(2, 0),
            sender: Validator::new(keypair.public_key()),
            block,
        };
        assert_eq!(
            verify_proposal(&proposal, &head, true),
            Err(ConsensusError::UnlinkableBlock)
        );
    }

    #[test]
    fn rejects_forged_signature() {
        let head = genesis_block();
        let keypair = Keypair::generate();
        let impostor = Keypair::generate();
        let mut block = signed_child(&head, &keypair);
        block.signature = impostor.sign(&block.block.header.hash().0);
        let proposal = Proposal {
            view: View::new(2, 0),
            sender: Validator::new(keypair.public_key()),
            block,
        };
        assert_eq!(
            verify_proposal(&proposal, &head, true),
            Err(ConsensusError::InvalidProposerSignature)
        );
    }

    #[test]
    fn rejects_unexpected_proposer() {
        let head = genesis_block();
        let keypair = Keypair::generate();
        let block = signed_child(&head, &keypair);
        let proposal = Proposal {
            view: View::new(2, 0),
            sender: Validator::new(keypair.public_key()),
            block,
        };
        assert_eq!(
            verify_proposal(&proposal, &head, false),
            Err(ConsensusError::UnknownProposer)
        );
    }
}
