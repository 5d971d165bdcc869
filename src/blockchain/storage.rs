use std::path::Path;

use log::warn;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use thiserror::Error;

use super::block::Block;
use super::hash::Hash;

const DIFFICULTY_KEY: &str = "difficulty";
const TIP_HASH_KEY: &str = "tip_hash";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Storage for blockchain data
///
/// Blocks are keyed by their big-endian index so iteration yields chain order.
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding the sled database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Saves a block and records it as the tip
    ///
    /// Both writes commit in one transaction across the `blocks` and `metadata` trees.
    ///
    /// # Arguments
    ///
    /// * `block` - The block to save
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let key = block.index.to_be_bytes();

        (&self.blocks, &self.metadata)
            .transaction(|(blocks, metadata)| -> ConflictableTransactionResult<(), ()> {
                blocks.insert(&key[..], value.as_slice())?;
                metadata.insert(TIP_HASH_KEY, &block.hash.as_bytes()[..])?;
                Ok(())
            })
            .map_err(|err| match err {
                TransactionError::Storage(err) => StorageError::DatabaseError(err),
                TransactionError::Abort(()) => {
                    StorageError::SerializationError(format!("Saving block {} aborted", block.index))
                }
            })
    }

    /// Gets all blocks in chain order
    ///
    /// Fails on the first block that cannot be decoded.
    pub fn get_all_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());

        for result in self.blocks.iter() {
            let (key, value) = result?;
            let block: Block = bincode::deserialize(&value).map_err(|e| {
                warn!("Failed to deserialize block at key {}: {}", hex::encode(&key), e);
                StorageError::DeserializationError(e.to_string())
            })?;
            blocks.push(block);
        }

        Ok(blocks)
    }

    /// Records the difficulty the stored chain was mined at
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Leading zero bits required in every block hash
    pub fn save_difficulty(&self, difficulty: u8) -> Result<(), StorageError> {
        self.metadata.insert(DIFFICULTY_KEY, vec![difficulty])?;
        Ok(())
    }

    pub fn get_difficulty(&self) -> Result<Option<u8>, StorageError> {
        match self.metadata.get(DIFFICULTY_KEY)? {
            Some(value) if value.len() == 1 => Ok(Some(value[0])),
            Some(value) => Err(StorageError::DeserializationError(format!(
                "Invalid difficulty record of {} bytes",
                value.len()
            ))),
            None => Ok(None),
        }
    }

    /// Gets the hash of the last saved block
    pub fn get_tip_hash(&self) -> Result<Hash, StorageError> {
        let value = self
            .metadata
            .get(TIP_HASH_KEY)?
            .ok_or_else(|| StorageError::NotFound("Tip hash not found".to_string()))?;

        let bytes: [u8; 32] = value[..].try_into().map_err(|_| {
            StorageError::DeserializationError("Invalid tip hash record".to_string())
        })?;

        Ok(Hash::from_bytes(bytes))
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
