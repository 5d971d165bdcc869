use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::hash::Hash;
use super::merkle::merkle_root;
use super::pow::{meets_difficulty, CancellationToken, MiningError, ProofOfWork};
use super::transaction::Transaction;

/// Errors that can occur while assembling or mining a block
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("A block must contain at least one transaction")]
    EmptyBlock,

    #[error("Mining failed: {0}")]
    Mining(#[from] MiningError),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created, at millisecond precision
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions committed by this block, in Merkle leaf order
    pub transactions: Vec<Transaction>,

    /// Merkle root over `transactions`
    #[schema(value_type = String)]
    pub merkle_root: Hash,

    /// Hash of the previous block
    #[schema(value_type = String)]
    pub previous_hash: Hash,

    /// Proof of work (nonce)
    pub nonce: u64,

    /// Hash of the block header including the nonce
    #[schema(value_type = String)]
    pub hash: Hash,
}

impl Block {
    /// Creates an unmined block (nonce 0) committing `transactions`
    ///
    /// Only the genesis block may be empty, see [`Block::genesis`].
    ///
    /// # Arguments
    ///
    /// * `index` - The height of the block
    /// * `previous_hash` - Hash of the block this one extends
    /// * `transactions` - The transactions to commit, in order
    pub fn new(
        index: u64,
        previous_hash: Hash,
        transactions: Vec<Transaction>,
    ) -> Result<Self, BlockError> {
        let merkle_root = merkle_root(&transactions).map_err(|_| BlockError::EmptyBlock)?;

        Ok(Self::assemble(index, previous_hash, transactions, merkle_root))
    }

    /// The unmined genesis block: index 0, zero previous hash, no transactions, zero root
    pub fn genesis() -> Self {
        Self::assemble(0, Hash::ZERO, Vec::new(), Hash::ZERO)
    }

    fn assemble(
        index: u64,
        previous_hash: Hash,
        transactions: Vec<Transaction>,
        merkle_root: Hash,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now().trunc_subsecs(3),
            transactions,
            merkle_root,
            previous_hash,
            nonce: 0,
            hash: Hash::ZERO,
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recomputes the hash from the header fields and the current nonce
    pub fn calculate_hash(&self) -> Hash {
        self.hash_with_nonce(self.nonce)
    }

    /// Hash the block would have with `nonce`
    pub fn hash_with_nonce(&self, nonce: u64) -> Hash {
        hash_header(&self.header_prefix(), nonce)
    }

    /// `index || previous_hash || merkle_root || timestamp`, the part of the header that
    /// stays fixed while mining
    pub(crate) fn header_prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(8 + 32 + 32 + 8);
        prefix.extend_from_slice(&self.index.to_be_bytes());
        prefix.extend_from_slice(self.previous_hash.as_bytes());
        prefix.extend_from_slice(self.merkle_root.as_bytes());
        prefix.extend_from_slice(&self.timestamp.timestamp_millis().to_be_bytes());
        prefix
    }

    /// Merkle root recomputed from the stored transactions
    ///
    /// The empty genesis block commits to [`Hash::ZERO`].
    pub fn compute_merkle_root(&self) -> Hash {
        merkle_root(&self.transactions).unwrap_or(Hash::ZERO)
    }

    /// Checks that the stored hash matches a recomputation and meets `difficulty`
    pub fn is_valid_proof(&self, difficulty: u8) -> bool {
        self.hash == self.calculate_hash() && meets_difficulty(&self.hash, difficulty)
    }

    /// Searches for a nonce on the current thread until the hash meets `difficulty`
    pub fn mine(self, difficulty: u8) -> Result<Block, MiningError> {
        ProofOfWork::new(difficulty)
            .mine(self, &CancellationToken::new())
            .map(|mined| mined.block)
    }
}

pub(crate) fn hash_header(prefix: &[u8], nonce: u64) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update(nonce.to_be_bytes());
    Hash::from_bytes(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Ed25519;
    use crate::blockchain::hash::hash_bytes;
    use crate::blockchain::user::User;

    fn transactions(n: u64) -> Vec<Transaction> {
        let alice = User::new("Alice", Ed25519).unwrap();
        let bob = User::new("Bob", Ed25519).unwrap();
        (1..=n)
            .map(|amount| alice.create_transaction(bob.address(), amount).unwrap())
            .collect()
    }

    #[test]
    fn test_new_block() {
        let txs = transactions(2);
        let previous_hash = hash_bytes(b"previous");
        let block = Block::new(1, previous_hash, txs.clone()).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, previous_hash);
        assert_eq!(block.merkle_root, merkle_root(&txs).unwrap());
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_empty_block_is_rejected() {
        assert_eq!(
            Block::new(1, Hash::ZERO, Vec::new()),
            Err(BlockError::EmptyBlock)
        );
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.previous_hash, Hash::ZERO);
        assert_eq!(genesis.merkle_root, Hash::ZERO);
        assert_eq!(genesis.compute_merkle_root(), Hash::ZERO);
        assert!(genesis.transactions.is_empty());
    }

    #[test]
    fn test_hash_covers_every_header_field() {
        let block = Block::new(1, hash_bytes(b"previous"), transactions(1)).unwrap();
        let original = block.calculate_hash();

        assert_ne!(block.hash_with_nonce(1), original);

        let mut changed = block.clone();
        changed.index = 2;
        assert_ne!(changed.calculate_hash(), original);

        let mut changed = block.clone();
        changed.previous_hash = hash_bytes(b"other");
        assert_ne!(changed.calculate_hash(), original);

        let mut changed = block.clone();
        changed.merkle_root = hash_bytes(b"root");
        assert_ne!(changed.calculate_hash(), original);

        let mut changed = block.clone();
        changed.timestamp = block.timestamp + chrono::Duration::milliseconds(1);
        assert_ne!(changed.calculate_hash(), original);
    }

    #[test]
    fn test_mined_block_has_valid_proof() {
        let block = Block::new(1, hash_bytes(b"previous"), transactions(3))
            .unwrap()
            .mine(8)
            .unwrap();

        assert!(block.is_valid_proof(8));
        assert!(block.hash.leading_zero_bits() >= 8);
    }

    #[test]
    fn test_forged_hash_is_not_a_valid_proof() {
        let mut block = Block::new(1, hash_bytes(b"previous"), transactions(1))
            .unwrap()
            .mine(4)
            .unwrap();

        // Passes the difficulty check but does not match the header
        block.hash = Hash::ZERO;
        assert!(!block.is_valid_proof(4));
    }

    #[test]
    fn test_changed_nonce_invalidates_proof() {
        let mut block = Block::new(1, hash_bytes(b"previous"), transactions(1))
            .unwrap()
            .mine(4)
            .unwrap();

        block.nonce += 1;
        assert!(!block.is_valid_proof(4));
    }

    #[test]
    fn test_json_round_trip_keeps_hash() {
        let block = Block::new(1, hash_bytes(b"previous"), transactions(2))
            .unwrap()
            .mine(4)
            .unwrap();

        let json = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, block);
        assert!(decoded.is_valid_proof(4));
    }
}
