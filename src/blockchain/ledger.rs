use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashSet;
use std::path::Path;

use super::block::{Block, BlockError};
use super::chain::{Blockchain, ChainError};
use super::crypto::{Address, CryptoError, Ed25519, KeyPairGenerator, PrivateKey, SignatureScheme};
use super::hash::Hash;
use super::merkle::{MerkleProof, MerkleTree};
use super::pow::{mine_next, CancellationToken, Mined, ProofOfWork};
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::user::User;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Chain error: {0}")]
    ChainError(#[from] ChainError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("No pending transactions to mine")]
    NothingToMine,

    #[error("Transaction {0} is already pending or on chain")]
    DuplicateTransaction(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Block {block} has no transaction at position {position}")]
    TransactionNotFound { block: u64, position: usize },

    #[error("Stored tip {stored} does not match loaded tip {loaded}")]
    TipMismatch { stored: Hash, loaded: Hash },
}

/// Proof that a transaction is committed by a block's Merkle root
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InclusionProof {
    pub block_index: u64,
    pub transaction: Transaction,
    #[schema(value_type = String)]
    pub leaf_hash: Hash,
    #[schema(value_type = String)]
    pub merkle_root: Hash,
    pub proof: MerkleProof,
}

/// The authoritative chain together with its pending transactions
///
/// All appends go through [`Ledger::append_block`], which holds the chain's write lock,
/// so block indices and links stay contiguous even with concurrent miners. Accepting a
/// block cancels every search that started against the previous tip.
#[derive(Debug)]
pub struct Ledger<S: SignatureScheme = Ed25519> {
    /// The current chain value
    chain: RwLock<Blockchain<S>>,

    /// Transactions waiting for the next block
    pending: Mutex<Vec<Transaction>>,

    /// Token handed to searches running against the current tip
    mining: Mutex<CancellationToken>,

    /// Threads per mining search
    workers: usize,

    /// Storage for blockchain data
    storage: Option<BlockchainStorage>,
}

impl Ledger<Ed25519> {
    /// Creates a ledger without persistence, using Ed25519 signatures
    pub fn in_memory(difficulty: u8, workers: usize) -> Result<Self, LedgerError> {
        Ok(Self::new(Blockchain::new(difficulty)?, workers))
    }
}

impl<S: SignatureScheme> Ledger<S> {
    /// Wraps an existing chain
    pub fn new(chain: Blockchain<S>, workers: usize) -> Self {
        Ledger {
            chain: RwLock::new(chain),
            pending: Mutex::new(Vec::new()),
            mining: Mutex::new(CancellationToken::new()),
            workers: workers.max(1),
            storage: None,
        }
    }

    /// Opens the chain stored at `path`, or creates and persists a genesis block
    ///
    /// A stored chain is fully re-validated and must end at the recorded tip hash; a
    /// difficulty recorded in storage takes precedence over `difficulty`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding the sled database
    /// * `difficulty` - Difficulty for a new chain
    /// * `workers` - Threads per mining search
    /// * `scheme` - Signature scheme used to verify transactions
    pub fn with_storage<P: AsRef<Path>>(
        path: P,
        difficulty: u8,
        workers: usize,
        scheme: S,
    ) -> Result<Self, LedgerError> {
        let storage = BlockchainStorage::new(path)?;
        let blocks = storage.get_all_blocks()?;

        let chain = if blocks.is_empty() {
            info!("No existing blockchain found in storage, creating genesis block");
            let chain = Blockchain::genesis(difficulty, scheme)?;

            storage.save_difficulty(difficulty)?;
            storage.save_block(chain.last())?;
            storage.flush()?;

            chain
        } else {
            let difficulty = match storage.get_difficulty()? {
                Some(stored) if stored != difficulty => {
                    warn!(
                        "Configured difficulty {} differs from stored difficulty {}, using stored value",
                        difficulty, stored
                    );
                    stored
                }
                Some(stored) => stored,
                None => difficulty,
            };

            let chain = Blockchain::from_blocks(blocks, difficulty, scheme)?;

            let stored = storage.get_tip_hash()?;
            let loaded = chain.last().hash;
            if stored != loaded {
                return Err(LedgerError::TipMismatch { stored, loaded });
            }

            info!("Loaded {} blocks from storage", chain.len());
            chain
        };

        let mut ledger = Self::new(chain, workers);
        ledger.storage = Some(storage);

        Ok(ledger)
    }

    /// Snapshot of the current chain
    pub fn chain(&self) -> Blockchain<S> {
        self.chain.read().clone()
    }

    pub fn difficulty(&self) -> u8 {
        self.chain.read().difficulty()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Block {
        self.chain.read().last().clone()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.chain.read().get(index).cloned()
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.lock().clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Verifies a transaction and queues it for the next block
    ///
    /// Returns the index of the block that will include it.
    ///
    /// # Arguments
    ///
    /// * `transaction` - A signed transaction not yet pending or on chain
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<u64, LedgerError> {
        let chain = self.chain.read();
        transaction.verify_signature(chain.scheme())?;

        let on_chain = chain
            .blocks()
            .iter()
            .flat_map(|block| block.transactions.iter())
            .any(|tx| tx.id == transaction.id);

        let mut pending = self.pending.lock();
        if on_chain || pending.iter().any(|tx| tx.id == transaction.id) {
            return Err(LedgerError::DuplicateTransaction(transaction.id));
        }

        pending.push(transaction);
        Ok(chain.last().index + 1)
    }

    /// Mines all pending transactions into the next block and appends it
    ///
    /// The pool is left untouched if mining is cancelled or the append fails.
    pub fn mine_pending(&self) -> Result<Mined, LedgerError> {
        // Token before tip: an append between the two reads cancels this token
        let cancel = self.mining.lock().clone();
        let (previous, difficulty, transactions) = {
            let chain = self.chain.read();
            let transactions = self.pending.lock().clone();
            (chain.last().clone(), chain.difficulty(), transactions)
        };

        if transactions.is_empty() {
            return Err(LedgerError::NothingToMine);
        }

        info!(
            "Mining block {} with {} transactions at difficulty {}",
            previous.index + 1,
            transactions.len(),
            difficulty
        );

        let pow = ProofOfWork::new(difficulty).with_workers(self.workers);
        let mined = mine_next(transactions, &previous, &pow, &cancel).map_err(|err| {
            warn!("Mining block {} stopped: {}", previous.index + 1, err);
            err
        })?;

        let block = self.append_block(mined.block)?;

        Ok(Mined {
            block,
            attempts: mined.attempts,
        })
    }

    /// Validates and appends a block, persists it and cancels stale searches
    ///
    /// On failure neither the chain nor the pending pool changes.
    ///
    /// # Arguments
    ///
    /// * `block` - A mined block on top of the current tip
    pub fn append_block(&self, block: Block) -> Result<Block, LedgerError> {
        let mut chain = self.chain.write();
        let extended = chain.append(block)?;
        let block = extended.last().clone();

        // The committed save is the point of no return; sled retries the flush on its own
        if let Some(storage) = &self.storage {
            storage.save_block(&block)?;
            if let Err(err) = storage.flush() {
                error!("Failed to flush block {} to disk: {}", block.index, err);
            }
        }

        *chain = extended;

        {
            let mut token = self.mining.lock();
            token.cancel();
            *token = CancellationToken::new();
        }

        // Pruned under the write lock so no miner can pair the new tip with a stale pool
        let included: HashSet<&str> = block.transactions.iter().map(|tx| tx.id.as_str()).collect();
        self.pending
            .lock()
            .retain(|tx| !included.contains(tx.id.as_str()));
        drop(chain);

        info!(
            "Appended block {} with {} transactions, hash {}",
            block.index,
            block.transactions.len(),
            block.hash
        );

        Ok(block)
    }

    /// Replays validation over the whole chain
    pub fn validate(&self) -> Result<(), ChainError> {
        self.chain.read().validate()
    }

    /// Builds the Merkle inclusion proof for transaction `position` of block `block_index`
    pub fn inclusion_proof(&self, block_index: u64, position: usize) -> Result<InclusionProof, LedgerError> {
        let block = self
            .block(block_index)
            .ok_or(LedgerError::BlockNotFound(block_index))?;

        let not_found = || LedgerError::TransactionNotFound {
            block: block_index,
            position,
        };

        let transaction = block.transactions.get(position).cloned().ok_or_else(not_found)?;
        let tree = MerkleTree::build(&block.transactions).map_err(|_| not_found())?;
        let proof = tree.proof(position).ok_or_else(not_found)?;

        Ok(InclusionProof {
            block_index,
            leaf_hash: transaction.hash(),
            transaction,
            merkle_root: block.merkle_root,
            proof,
        })
    }
}

impl<S: SignatureScheme + KeyPairGenerator> Ledger<S> {
    /// Creates a user with a fresh key pair under the ledger's scheme
    pub fn create_user(&self, name: &str) -> Result<User<S>, LedgerError> {
        let scheme = self.chain.read().scheme().clone();
        Ok(User::new(name, scheme)?)
    }

    /// Signs a payment with `private_key` and submits it
    ///
    /// The sender is the public key belonging to `private_key`.
    pub fn create_transaction(
        &self,
        private_key: &PrivateKey,
        receiver: Address,
        amount: u64,
    ) -> Result<(Transaction, u64), LedgerError> {
        let scheme = self.chain.read().scheme().clone();
        let sender = scheme.public_key(private_key)?;
        let transaction = Transaction::create(sender, receiver, amount, private_key, &scheme)?;

        let block_index = self.submit_transaction(transaction.clone())?;
        Ok((transaction, block_index))
    }
}
