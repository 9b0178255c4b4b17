//! Network message envelope.
//!
//! These messages flow between peers and are forwarded to the runtime.
//! The consensus-relevant variants (`Proposal`, `Vote`) carry the exact
//! types the `consensus` crate signs and verifies; `net` never inspects
//! their contents, only routes them.

use consensus::{Proposal, Vote};
use serde::{Deserialize, Serialize};

use crate::sync::SyncRequest;

/// Messages that can be sent/received over the network. Mirrors the 1-byte
/// wire tag consensus::wire::MessageType agrees on: `Handshake = 0,
/// Proposal = 1, Vote = 2, SyncRequest = 3`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NetworkMessage {
    /// Peer handshake
    Handshake(HandshakeMessage),

    /// A block proposal forwarded to the consensus core
    Proposal(Proposal),

    /// A PREPARE/COMMIT/ROUND-CHANGE vote forwarded to the consensus core
    Vote(Vote),

    /// A request to catch up on blocks a peer is behind on
    SyncRequest(SyncRequest),
}

impl NetworkMessage {
    /// The wire tag this message carries, matching `consensus::wire::MessageType`.
    pub fn message_type(&self) -> consensus::MessageType {
        use consensus::MessageType;
        match self {
            NetworkMessage::Handshake(_) => MessageType::Handshake,
            NetworkMessage::Proposal(_) => MessageType::Proposal,
            NetworkMessage::Vote(_) => MessageType::Vote,
            NetworkMessage::SyncRequest(_) => MessageType::SyncRequest,
        }
    }

    /// Lift the consensus-relevant variants into the core's own message
    /// enum for dispatch into `ConsensusManager`. Returns `None` for
    /// `Handshake`/`SyncRequest`, which `net` owns and handles itself.
    pub fn into_consensus_message(self) -> Option<consensus::ConsensusMessage> {
        match self {
            NetworkMessage::Proposal(p) => Some(consensus::ConsensusMessage::Proposal(p)),
            NetworkMessage::Vote(v) => Some(consensus::ConsensusMessage::Vote(v)),
            NetworkMessage::Handshake(_) | NetworkMessage::SyncRequest(_) => None,
        }
    }
}

/// Peer handshake message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Protocol version
    pub version: u32,

    /// Chain ID
    pub chain_id: [u8; 32],

    /// Current block height
    pub height: u64,

    /// Node's public identity
    pub node_id: [u8; 32],
}

impl HandshakeMessage {
    /// Create a new handshake message.
    pub fn new(chain_id: [u8; 32], height: u64, node_id: [u8; 32]) -> Self {
        Self {
            version: 1,
            chain_id,
            height,
            node_id,
        }
    }
}

/// Internal event for the network service.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    /// Received a message from a peer
    MessageReceived {
        from: [u8; 32],
        message: NetworkMessage,
    },

    /// New peer connected
    PeerConnected { peer_id: [u8; 32] },

    /// Peer disconnected
    PeerDisconnected { peer_id: [u8; 32] },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncRequest;

    #[test]
    fn test_handshake_message() {
        let chain_id = [1u8; 32];
        let node_id = [2u8; 32];
        let msg = HandshakeMessage::new(chain_id, 100, node_id);

        assert_eq!(msg.version, 1);
        assert_eq!(msg.chain_id, chain_id);
        assert_eq!(msg.height, 100);
    }

    #[test]
    fn sync_request_is_not_a_consensus_message() {
        let msg = NetworkMessage::SyncRequest(SyncRequest::new(5));
        assert!(msg.into_consensus_message().is_none());
    }

    #[test]
    fn message_type_matches_wire_tag() {
        let msg = NetworkMessage::SyncRequest(SyncRequest::new(1));
        assert_eq!(msg.message_type(), consensus::MessageType::SyncRequest);
    }
}
