//! Node orchestration.
//!
//! Wires `consensus`'s phase machine to `net` for transport and catch-up
//! tracking, `storage` for crash-safe block and state persistence, and
//! `execution` for the demo state root.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use consensus::types::{Block, Header, SignedBlock};
use consensus::{BlockHeightId, BlockStore as _, ConsensusEvent, ConsensusManager, Hash};
use crypto::Keypair;
use net::message::{HandshakeMessage, NetworkEvent};
use net::{Network, NetworkConfig, NetworkMessage, Synchronizer};
use storage::{ConsensusBlockStore, Storage};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::NodeConfig;

/// The integrated node: one validator's consensus, storage, and network
/// stack.
pub struct Node {
    config: NodeConfig,
    manager: Arc<ConsensusManager>,
    block_store: Arc<ConsensusBlockStore>,
    app_storage: Storage,
    self_keypair: Keypair,
    self_address: String,
    network: Network,
    network_rx: mpsc::Receiver<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<ConsensusEvent>,
    state: execution::State,
    sync: Synchronizer,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Node {
    /// Create a new node from configuration, bootstrapping storage against
    /// the configured genesis.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let genesis = config
            .validator
            .load_genesis()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        let validator_set = config
            .validator
            .load_validator_set()
            .map_err(|e| NodeError::Config(e.to_string()))?;

        // Two independent keypairs from the same secret: the manager
        // consumes one for vote signing, the node keeps the other for
        // signing freshly-proposed block headers.
        let manager_keypair = config
            .validator
            .load_keypair()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        let self_keypair = config
            .validator
            .load_keypair()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        let self_address = self_keypair.address();

        let block_store = Arc::new(
            ConsensusBlockStore::open(config.node.data_dir.clone())
                .map_err(|e| NodeError::StorageInit(e.to_string()))?,
        );

        let genesis_block = build_genesis_block(&genesis);
        block_store
            .bootstrap(&genesis, genesis_block)
            .await
            .map_err(|e| NodeError::Consensus(e.to_string()))?;

        let app_storage = Storage::new(config.node.data_dir.join("app_state"))
            .map_err(|e| NodeError::StorageInit(e.to_string()))?;
        let state = if app_storage.has_state() {
            app_storage
                .load_state::<execution::State>()
                .map_err(|e| NodeError::StorageInit(e.to_string()))?
        } else {
            execution::State::genesis()
        };

        let local_height = block_store
            .head()
            .await
            .map(|b| b.header.height_id.height)
            .unwrap_or(0);
        let sync = Synchronizer::new(local_height);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(
            ConsensusManager::new(
                config.consensus.to_consensus_config(),
                validator_set,
                manager_keypair,
                Arc::clone(&block_store) as Arc<dyn consensus::BlockStore>,
                event_tx,
            )
            .map_err(|e| NodeError::Consensus(e.to_string()))?,
        );

        let node_id = address_to_node_id(&self_address);
        let network_config = NetworkConfig::new(config.listen_addr(), node_id)
            .with_chain_id(genesis.chain_id().0)
            .with_max_peers(config.network.max_peers);
        let (network, network_rx) = Network::new(network_config);

        Ok(Self {
            config,
            manager,
            block_store,
            app_storage,
            self_keypair,
            self_address,
            network,
            network_rx,
            event_rx,
            state,
            sync,
            shutdown_tx: None,
        })
    }

    /// Run the node until shutdown.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        info!(
            data_dir = ?self.config.node.data_dir,
            listen = %self.config.listen_addr(),
            address = %self.self_address,
            "starting node"
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        self.manager
            .start()
            .await
            .map_err(|e| NodeError::Consensus(e.to_string()))?;

        let mut round_change_timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                Some(event) = self.network_rx.recv() => {
                    self.handle_network_event(event).await;
                }

                Some(event) = self.event_rx.recv() => {
                    self.handle_consensus_event(event, &mut round_change_timer).await;
                }

                _ = async {
                    match &mut round_change_timer {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                }, if round_change_timer.is_some() => {
                    round_change_timer = None;
                    self.manager.on_timeout().await;
                }

                _ = shutdown_rx.recv() => {
                    info!("shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::MessageReceived { from: _, message } => {
                self.handle_message(message).await;
            }
            NetworkEvent::PeerConnected { peer_id } => {
                info!(peer = %hex::encode(peer_id), "peer connected");
            }
            NetworkEvent::PeerDisconnected { peer_id } => {
                info!(peer = %hex::encode(peer_id), "peer disconnected");
            }
        }
    }

    async fn handle_message(&mut self, message: NetworkMessage) {
        if let NetworkMessage::Handshake(handshake) = &message {
            self.observe_peer_handshake(handshake).await;
            return;
        }

        let Some(consensus_message) = message.into_consensus_message() else {
            return;
        };

        match consensus_message {
            consensus::ConsensusMessage::Proposal(proposal) => {
                self.manager.on_proposal(proposal).await;
            }
            consensus::ConsensusMessage::Vote(vote) => {
                use consensus::VoteKind;
                match vote.kind {
                    VoteKind::Prepare => {
                        self.manager.on_prepare(vote).await;
                    }
                    VoteKind::Commit => {
                        self.manager.on_commit(vote).await;
                    }
                    VoteKind::RoundChange => {
                        self.manager.on_round_change(vote).await;
                    }
                };
            }
        }
    }

    /// Feed a peer's self-reported height into the catch-up synchronizer.
    async fn observe_peer_handshake(&mut self, handshake: &HandshakeMessage) {
        let local_height = self
            .block_store
            .head()
            .await
            .map(|b| b.header.height_id.height)
            .unwrap_or(0);
        self.sync.observe_peer_height(local_height, handshake.height);
        if !self.sync.is_in_sync() {
            warn!(
                local_height,
                peer_height = handshake.height,
                "falling behind the validator set's committed height"
            );
        }
    }

    async fn handle_consensus_event(
        &mut self,
        event: ConsensusEvent,
        round_change_timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
    ) {
        match event {
            ConsensusEvent::BroadcastProposal(proposal) => {
                let _ = self
                    .network
                    .broadcast(NetworkMessage::Proposal(proposal))
                    .await;
            }
            ConsensusEvent::BroadcastVote(vote) => {
                let _ = self.network.broadcast(NetworkMessage::Vote(vote)).await;
            }
            ConsensusEvent::BlockFinalized { height, block_id } => {
                if let Err(e) = self.state.apply_finalized_block(height, block_id.0) {
                    error!(%e, height, "failed to fold finalized block into state");
                } else {
                    info!(height, root = %hex::encode(self.state.state_root), "block finalized");
                    if let Err(e) = self.app_storage.save_state(&self.state) {
                        error!(%e, height, "failed to persist application state");
                    }
                }
                self.sync.note_height_applied(height);
            }
            ConsensusEvent::ResetRoundChangeTimer { height, round, timeout } => {
                *round_change_timer = Some(Box::pin(tokio::time::sleep(timeout)));
                if round == 0
                    && self.sync.is_in_sync()
                    && !self.manager.is_locked().await
                    && self.manager.is_self_proposer().await
                {
                    self.propose_new_block(height, round).await;
                }
            }
        }
    }

    /// Build and send a fresh block proposal for `height`/`round`. Only
    /// called when this node is the round's proposer and holds no lock
    /// from a prior round — a locked proposal is resent by the manager
    /// itself via `BroadcastProposal`.
    async fn propose_new_block(&mut self, height: u64, round: u64) {
        let Some(head) = self.block_store.head().await else {
            warn!("cannot propose without a chain head");
            return;
        };
        let previous_id = head.header.height_id.id;
        let proposer = self.manager_self_validator();

        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let content_id = Hash::of(
            format!("block:{height}:{round}:{}", self.self_address).as_bytes(),
        );

        let header = Header {
            height_id: BlockHeightId::new(height, content_id),
            previous_id,
            proposer,
            timestamp_nanos,
        };
        let digest = header.hash();
        let signature = self.self_keypair.sign(&digest.0);
        let signed_block = SignedBlock {
            block: Block { header, commits: Vec::new() },
            signature,
        };

        self.manager.send_proposal(signed_block).await;
    }

    fn manager_self_validator(&self) -> consensus::types::Validator {
        consensus::types::Validator::new(self.self_keypair.public_key())
    }

    /// Shutdown the node.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

fn address_to_node_id(address: &str) -> [u8; 32] {
    let mut id = [0u8; 32];
    let bytes = address.as_bytes();
    for (i, &b) in bytes.iter().take(32).enumerate() {
        id[i] = b;
    }
    id
}

fn build_genesis_block(genesis: &consensus::Genesis) -> Block {
    let header = Header {
        height_id: BlockHeightId::new(0, Hash::of(b"genesis")),
        previous_id: Hash::EMPTY,
        proposer: genesis.proposer.clone(),
        timestamp_nanos: genesis.timestamp_nanos,
    };
    Block { header, commits: Vec::new() }
}

/// Node errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage initialization failed: {0}")]
    StorageInit(String),

    #[error("consensus error: {0}")]
    Consensus(String),
}
