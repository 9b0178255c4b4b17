//! Adapts the crash-safe, synchronous [`crate::block_store::BlockStore`]
//! into the async `consensus::BlockStore` capability the manager is
//! injected with. Blocking filesystem work runs on the blocking thread
//! pool via `spawn_blocking`, matching the "block-store writes are
//! blocking" note in SPEC_FULL.md §5.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use consensus::types::Block;
use consensus::{ConsensusError, Genesis};
use tokio::sync::Mutex;

use crate::block_store::BlockStore as RawBlockStore;
use crate::consensus_store::ConsensusStore;
use crate::StorageError;

/// Persists `consensus::Block`s and tracks the current head, honoring the
/// `BlockStore` contract of spec §6: `add_block` refuses duplicate heights,
/// and `head()` survives restarts via a well-known `last_height` marker.
pub struct ConsensusBlockStore {
    blocks: Arc<RawBlockStore>,
    meta: Arc<ConsensusStore>,
    head: Mutex<Option<Block>>,
}

impl ConsensusBlockStore {
    pub fn open(base_path: PathBuf) -> Result<Self, StorageError> {
        let blocks = Arc::new(RawBlockStore::new(base_path.join("blocks"))?);
        let meta = Arc::new(ConsensusStore::new(base_path.join("meta"))?);
        let head = match blocks.latest_height()? {
            Some(height) => Some(blocks.load::<Block>(height)?),
            None => None,
        };
        Ok(Self {
            blocks,
            meta,
            head: Mutex::new(head),
        })
    }

    /// Seed the store with a genesis block if it is still empty. Fails
    /// fatally if a persisted genesis disagrees with `genesis`'s chain id
    /// (SPEC_FULL.md §10's "genesis chain identity" safety check).
    pub async fn bootstrap(&self, genesis: &Genesis, genesis_block: Block) -> Result<(), ConsensusError> {
        let meta = Arc::clone(&self.meta);
        let chain_id = genesis.chain_id();
        let persisted: Option<consensus::Hash> = tokio::task::spawn_blocking(move || {
            meta.load_round_state::<consensus::Hash>()
        })
        .await
        .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?
        .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?;

        match persisted {
            Some(persisted_id) if persisted_id != chain_id => {
                return Err(ConsensusError::Fatal {
                    reason: format!(
                        "configured genesis {chain_id} disagrees with persisted genesis {persisted_id}"
                    ),
                });
            }
            Some(_) => {}
            None => {
                let meta = Arc::clone(&self.meta);
                tokio::task::spawn_blocking(move || meta.save_round_state(&chain_id))
                    .await
                    .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?
                    .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?;
            }
        }

        let mut head = self.head.lock().await;
        if head.is_none() {
            *head = Some(genesis_block);
        }
        Ok(())
    }
}

#[async_trait]
impl consensus::BlockStore for ConsensusBlockStore {
    async fn head(&self) -> Option<Block> {
        self.head.lock().await.clone()
    }

    async fn add_block(&self, block: Block) -> Result<(), ConsensusError> {
        let mut head = self.head.lock().await;
        let expected_height = head.as_ref().map(|b| b.header.height_id.height + 1);
        if expected_height != Some(block.header.height_id.height) {
            return Err(ConsensusError::Fatal {
                reason: format!(
                    "refusing to store block at height {} after head {:?}",
                    block.header.height_id.height,
                    head.as_ref().map(|b| b.header.height_id.height)
                ),
            });
        }

        let blocks = Arc::clone(&self.blocks);
        let height = block.header.height_id.height;
        let to_store = block.clone();
        tokio::task::spawn_blocking(move || blocks.save(height, &to_store))
            .await
            .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?
            .map_err(|e| ConsensusError::Fatal { reason: e.to_string() })?;

        *head = Some(block);
        Ok(())
    }
}
