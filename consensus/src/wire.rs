//! Wire framing for consensus messages: the 1-byte `MessageType` tag plus
//! the codec-encoded payload, bit-exact per SPEC_FULL.md §8. `Handshake` and
//! `SyncRequest` never reach the consensus core — they are owned by `net` —
//! but the tag space is defined here so every crate agrees on the byte
//! values.

use serde::{Deserialize, Serialize};

use crate::types::{Proposal, Vote};

/// The 1-byte wire tag identifying a framed message's payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0,
    Proposal = 1,
    Vote = 2,
    SyncRequest = 3,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Handshake),
            1 => Some(Self::Proposal),
            2 => Some(Self::Vote),
            3 => Some(Self::SyncRequest),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// The payload the consensus core itself produces and consumes. Canonical
/// codec is `bincode` (see SPEC_FULL.md §8) — the same crate the workspace
/// already uses for persistence and network payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ConsensusMessage::Proposal(_) => MessageType::Proposal,
            ConsensusMessage::Vote(_) => MessageType::Vote,
        }
    }

    /// Encode with the 1-byte type tag prefixed.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        let mut out = vec![self.message_type().to_byte()];
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    /// Decode a framed payload produced by [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        if bytes.is_empty() {
            return Err(Box::new(bincode::ErrorKind::Custom(
                "empty frame".to_string(),
            )));
        }
        bincode::deserialize(&bytes[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, VoteKind, View};
    use crypto::Keypair;

    #[test]
    fn message_type_round_trips_through_bytes() {
        for ty in [
            MessageType::Handshake,
            MessageType::Proposal,
            MessageType::Vote,
            MessageType::SyncRequest,
        ] {
            assert_eq!(MessageType::from_byte(ty.to_byte()), Some(ty));
        }
    }

    #[test]
    fn vote_message_encodes_and_decodes() {
        let keypair = Keypair::generate();
        let view = View::new(2, 0);
        let digest = Hash::of(b"vote payload");
        let vote = Vote {
            digest,
            address: keypair.address(),
            kind: VoteKind::Prepare,
            view,
            block_id: Hash::of(b"block"),
            signature: keypair.sign(&digest.0),
        };
        let message = ConsensusMessage::Vote(vote.clone());
        let encoded = message.encode().expect("encode succeeds");
        assert_eq!(encoded[0], MessageType::Vote.to_byte());
        let decoded = ConsensusMessage::decode(&encoded).expect("decode succeeds");
        match decoded {
            ConsensusMessage::Vote(decoded_vote) => assert_eq!(decoded_vote, vote),
            _ => panic!("expected a Vote variant"),
        }
    }
}
