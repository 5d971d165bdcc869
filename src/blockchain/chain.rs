use log::{debug, info};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::crypto::{Ed25519, SignatureScheme};
use super::hash::Hash;

/// Integrity violations found while appending or validating
///
/// Every variant names the block that failed the check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block {index}: previous hash {found} does not match tip hash {expected}")]
    Linkage { index: u64, expected: Hash, found: Hash },

    #[error("Block index {found} does not follow tip index {expected_after}")]
    Index { expected_after: u64, found: u64 },

    #[error("Block {index} contains no transactions")]
    EmptyBlock { index: u64 },

    #[error("Block {index}: hash fails proof of work at difficulty {difficulty}")]
    ProofOfWork { index: u64, difficulty: u8 },

    #[error("Block {index}: stored Merkle root {stored} does not match computed root {computed}")]
    MerkleMismatch { index: u64, stored: Hash, computed: Hash },

    #[error("Block {index}: transaction {transaction_id} has an invalid signature")]
    Signature { index: u64, transaction_id: String },

    #[error("Block {index} is not a valid genesis block: {reason}")]
    Genesis { index: u64, reason: &'static str },
}

impl ChainError {
    /// Index of the offending block
    pub fn block_index(&self) -> u64 {
        match self {
            ChainError::Linkage { index, .. }
            | ChainError::EmptyBlock { index }
            | ChainError::ProofOfWork { index, .. }
            | ChainError::MerkleMismatch { index, .. }
            | ChainError::Signature { index, .. }
            | ChainError::Genesis { index, .. } => *index,
            ChainError::Index { found, .. } => *found,
        }
    }
}

/// An append-only, validated sequence of blocks
///
/// The chain is a plain value: [`Blockchain::append`] returns the extended chain and
/// leaves the receiver untouched.
#[derive(Debug, Clone)]
pub struct Blockchain<S: SignatureScheme = Ed25519> {
    /// The chain of blocks, genesis first
    blocks: Vec<Block>,

    /// Mining difficulty (number of leading zero bits required in hash)
    difficulty: u8,

    /// Scheme used to verify transaction signatures
    scheme: S,
}

impl Blockchain<Ed25519> {
    /// Creates a chain holding a freshly mined genesis block, using Ed25519 signatures
    pub fn new(difficulty: u8) -> Result<Self, BlockError> {
        Self::genesis(difficulty, Ed25519)
    }
}

impl<S: SignatureScheme> Blockchain<S> {
    /// Creates a chain holding a freshly mined genesis block
    pub fn genesis(difficulty: u8, scheme: S) -> Result<Self, BlockError> {
        let genesis = Block::genesis().mine(difficulty)?;
        info!("Mined genesis block {}", genesis.hash);

        Ok(Blockchain {
            blocks: vec![genesis],
            difficulty,
            scheme,
        })
    }

    /// Rebuilds a chain from stored blocks and validates it end to end
    ///
    /// # Arguments
    ///
    /// * `blocks` - Blocks in chain order, starting at genesis
    /// * `difficulty` - Leading zero bits every block hash must carry
    /// * `scheme` - Signature scheme used to verify transactions
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u8, scheme: S) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::Genesis {
                index: 0,
                reason: "chain has no blocks",
            });
        }

        let chain = Blockchain {
            blocks,
            difficulty,
            scheme,
        };
        chain.validate()?;

        Ok(chain)
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// Gets the last block in the chain
    pub fn last(&self) -> &Block {
        // A chain always holds at least its genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Validates `block` against the tip and returns the extended chain
    ///
    /// # Arguments
    ///
    /// * `block` - The candidate successor of [`Blockchain::last`]
    pub fn append(&self, block: Block) -> Result<Self, ChainError> {
        self.check_successor(self.last(), &block)?;
        debug!("Block {} accepted on top of {}", block.index, block.previous_hash);

        let mut blocks = Vec::with_capacity(self.blocks.len() + 1);
        blocks.extend_from_slice(&self.blocks);
        blocks.push(block);

        Ok(Blockchain {
            blocks,
            difficulty: self.difficulty,
            scheme: self.scheme.clone(),
        })
    }

    /// Replays every append-time check from genesis to tip
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ChainError> {
        let genesis = self.blocks.first().ok_or(ChainError::Genesis {
            index: 0,
            reason: "chain has no blocks",
        })?;
        self.check_genesis(genesis)?;

        for pair in self.blocks.windows(2) {
            self.check_successor(&pair[0], &pair[1])?;
        }

        Ok(())
    }

    fn check_genesis(&self, block: &Block) -> Result<(), ChainError> {
        let fail = |reason| {
            Err(ChainError::Genesis {
                index: block.index,
                reason,
            })
        };

        if block.index != 0 {
            return fail("index is not 0");
        }
        if block.previous_hash != Hash::ZERO {
            return fail("previous hash is not the zero sentinel");
        }
        if !block.transactions.is_empty() || block.merkle_root != Hash::ZERO {
            return fail("genesis must not commit transactions");
        }
        if !block.is_valid_proof(self.difficulty) {
            return Err(ChainError::ProofOfWork {
                index: block.index,
                difficulty: self.difficulty,
            });
        }

        Ok(())
    }

    fn check_successor(&self, previous: &Block, block: &Block) -> Result<(), ChainError> {
        if block.previous_hash != previous.hash {
            return Err(ChainError::Linkage {
                index: block.index,
                expected: previous.hash,
                found: block.previous_hash,
            });
        }

        if Some(block.index) != previous.index.checked_add(1) {
            return Err(ChainError::Index {
                expected_after: previous.index,
                found: block.index,
            });
        }

        if block.transactions.is_empty() {
            return Err(ChainError::EmptyBlock { index: block.index });
        }

        if !block.is_valid_proof(self.difficulty) {
            return Err(ChainError::ProofOfWork {
                index: block.index,
                difficulty: self.difficulty,
            });
        }

        let computed = block.compute_merkle_root();
        if computed != block.merkle_root {
            return Err(ChainError::MerkleMismatch {
                index: block.index,
                stored: block.merkle_root,
                computed,
            });
        }

        for transaction in &block.transactions {
            if transaction.verify_signature(&self.scheme).is_err() {
                return Err(ChainError::Signature {
                    index: block.index,
                    transaction_id: transaction.id.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{Address, DigitalSignature, PrivateKey, CryptoError};
    use crate::blockchain::pow::mine_block;
    use crate::blockchain::transaction::Transaction;
    use crate::blockchain::user::User;

    const DIFFICULTY: u8 = 4;

    fn users() -> (User, User) {
        (
            User::new("Alice", Ed25519).unwrap(),
            User::new("Bob", Ed25519).unwrap(),
        )
    }

    fn payments(from: &User, to: &User, amounts: &[u64]) -> Vec<Transaction> {
        amounts
            .iter()
            .map(|amount| from.create_transaction(to.address(), *amount).unwrap())
            .collect()
    }

    /// Genesis plus `extra` mined blocks of three transactions each
    fn chain_with_blocks(extra: usize) -> (Blockchain, User, User) {
        let (alice, bob) = users();
        let mut chain = Blockchain::new(DIFFICULTY).unwrap();

        for _ in 0..extra {
            let block = mine_block(payments(&alice, &bob, &[10, 10, 10]), chain.last(), DIFFICULTY)
                .unwrap();
            chain = chain.append(block).unwrap();
        }

        (chain, alice, bob)
    }

    #[test]
    fn test_new_blockchain() {
        let chain = Blockchain::new(DIFFICULTY).unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last().index, 0);
        assert_eq!(chain.last().previous_hash, Hash::ZERO);
        assert!(chain.last().is_valid_proof(DIFFICULTY));
        assert!(chain.validate().is_ok());
    }

    #[test]
    fn test_append_and_validate_scenario() {
        let (chain, alice, bob) = chain_with_blocks(0);

        let block = mine_block(payments(&alice, &bob, &[10, 20, 30]), chain.last(), DIFFICULTY)
            .unwrap();
        let mut chain = chain.append(block).unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.validate(), Ok(()));

        // Tamper with a stored transaction, bypassing append
        chain.blocks[1].transactions[1].amount = 2_000;

        let err = chain.validate().unwrap_err();
        assert!(matches!(err, ChainError::MerkleMismatch { index: 1, .. }));
        assert_eq!(err.block_index(), 1);
    }

    #[test]
    fn test_append_leaves_original_chain_untouched() {
        let (chain, alice, bob) = chain_with_blocks(1);
        let block = mine_block(payments(&alice, &bob, &[1]), chain.last(), DIFFICULTY).unwrap();

        let extended = chain.append(block).unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(extended.len(), 3);
        assert_eq!(extended.blocks()[..2], chain.blocks()[..]);
    }

    #[test]
    fn test_stale_previous_hash_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(2);
        assert_eq!(chain.len(), 3);

        // Third block built on block 1 instead of the tip
        let stale_parent = chain.get(1).unwrap().clone();
        let mut block = Block::new(3, stale_parent.hash, payments(&alice, &bob, &[5])).unwrap();
        block = block.mine(DIFFICULTY).unwrap();

        let err = chain.append(block).unwrap_err();
        assert_eq!(
            err,
            ChainError::Linkage {
                index: 3,
                expected: chain.last().hash,
                found: stale_parent.hash,
            }
        );
    }

    #[test]
    fn test_non_contiguous_index_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(1);

        let block = Block::new(5, chain.last().hash, payments(&alice, &bob, &[5]))
            .unwrap()
            .mine(DIFFICULTY)
            .unwrap();

        assert_eq!(
            chain.append(block).unwrap_err(),
            ChainError::Index {
                expected_after: 1,
                found: 5
            }
        );
    }

    #[test]
    fn test_unmined_block_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(0);

        // Search until a nonce that fails the target, so the check is deterministic
        let mut block = Block::new(1, chain.last().hash, payments(&alice, &bob, &[5])).unwrap();
        while block.hash.leading_zero_bits() >= u32::from(DIFFICULTY) {
            block.nonce += 1;
            block.hash = block.calculate_hash();
        }

        let err = chain.append(block).unwrap_err();
        assert_eq!(
            err,
            ChainError::ProofOfWork {
                index: 1,
                difficulty: DIFFICULTY
            }
        );
    }

    #[test]
    fn test_forged_hash_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(0);

        let mut block = mine_block(payments(&alice, &bob, &[5]), chain.last(), DIFFICULTY).unwrap();
        // Meets any difficulty but does not match the header
        block.hash = Hash::ZERO;

        assert!(matches!(
            chain.append(block),
            Err(ChainError::ProofOfWork { index: 1, .. })
        ));
    }

    #[test]
    fn test_stale_merkle_root_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(0);

        let mut transactions = payments(&alice, &bob, &[1, 2, 3]);
        let block = Block::new(1, chain.last().hash, transactions.clone()).unwrap();

        // Swap in a different, validly signed transaction and re-mine over the old root
        transactions[0] = bob.create_transaction(alice.address(), 99).unwrap();
        let tampered = Block {
            transactions,
            ..block
        }
        .mine(DIFFICULTY)
        .unwrap();

        assert!(matches!(
            chain.append(tampered),
            Err(ChainError::MerkleMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let (chain, alice, bob) = chain_with_blocks(0);

        let mut transactions = payments(&alice, &bob, &[1, 2]);
        transactions[1].signature = transactions[0].signature.clone();
        let forged_id = transactions[1].id.clone();

        let block = mine_block(transactions, chain.last(), DIFFICULTY).unwrap();

        assert_eq!(
            chain.append(block).unwrap_err(),
            ChainError::Signature {
                index: 1,
                transaction_id: forged_id
            }
        );
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let (chain, _, _) = chain_with_blocks(0);

        let mut block = Block::genesis();
        block.index = 1;
        block.previous_hash = chain.last().hash;
        let block = block.mine(DIFFICULTY).unwrap();

        assert_eq!(chain.append(block).unwrap_err(), ChainError::EmptyBlock { index: 1 });
    }

    #[test]
    fn test_validate_is_idempotent() {
        let (chain, _, _) = chain_with_blocks(2);

        let first = chain.validate();
        let second = chain.validate();

        assert_eq!(first, Ok(()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_reports_first_violation() {
        let (mut chain, _, _) = chain_with_blocks(3);

        chain.blocks[3].transactions[0].amount += 1;
        chain.blocks[2].transactions[0].amount += 1;

        assert_eq!(chain.validate().unwrap_err().block_index(), 2);
    }

    #[test]
    fn test_validate_detects_broken_link() {
        let (mut chain, _, _) = chain_with_blocks(2);
        chain.blocks[2].previous_hash = Hash::ZERO;
        assert!(matches!(chain.validate(), Err(ChainError::Linkage { index: 2, .. })));
    }

    #[test]
    fn test_validate_checks_genesis() {
        let (mut chain, alice, bob) = chain_with_blocks(1);
        chain.blocks[0].transactions = payments(&alice, &bob, &[1]);

        assert!(matches!(chain.validate(), Err(ChainError::Genesis { index: 0, .. })));
    }

    #[test]
    fn test_from_blocks_validates() {
        let (chain, _, _) = chain_with_blocks(2);

        let restored = Blockchain::from_blocks(chain.blocks().to_vec(), DIFFICULTY, Ed25519).unwrap();
        assert_eq!(restored.len(), 3);

        let mut blocks = chain.blocks().to_vec();
        blocks.remove(1);
        assert!(Blockchain::from_blocks(blocks, DIFFICULTY, Ed25519).is_err());

        assert!(Blockchain::from_blocks(Vec::new(), DIFFICULTY, Ed25519).is_err());
    }

    /// Scheme that accepts nothing, to show the chain only trusts its scheme
    #[derive(Debug, Clone)]
    struct RejectAll;

    impl SignatureScheme for RejectAll {
        fn sign(&self, _: &[u8], _: &PrivateKey) -> Result<DigitalSignature, CryptoError> {
            Err(CryptoError::SigningError("signing disabled".to_string()))
        }

        fn verify(&self, _: &[u8], _: &DigitalSignature, _: &Address) -> bool {
            false
        }
    }

    #[test]
    fn test_signature_scheme_is_pluggable() {
        let (alice, bob) = users();
        let chain = Blockchain::genesis(DIFFICULTY, RejectAll).unwrap();

        let block = mine_block(payments(&alice, &bob, &[1]), chain.last(), DIFFICULTY).unwrap();
        assert!(matches!(
            chain.append(block),
            Err(ChainError::Signature { index: 1, .. })
        ));
    }
}
