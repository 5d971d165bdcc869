//! Proof-of-work nonce search.
//!
//! A hash meets difficulty `d` when it has at least `d` leading zero bits, i.e. its value
//! read as a big-endian integer is below `2^(256 - d)`. Expected attempts are about `2^d`.

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use super::block::{hash_header, Block, BlockError};
use super::hash::Hash;
use super::transaction::Transaction;

/// Attempts between two looks at the cancellation flag
pub const CANCEL_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("No nonce satisfies the difficulty target")]
    NonceSpaceExhausted,
}

/// Shared flag used to abandon a running search
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Checks the leading-zero-bits predicate
pub fn meets_difficulty(hash: &Hash, difficulty: u8) -> bool {
    hash.leading_zero_bits() >= u32::from(difficulty)
}

/// A successfully mined block and the number of hashes computed to find it
#[derive(Debug, Clone)]
pub struct Mined {
    pub block: Block,
    pub attempts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: u8,
    workers: usize,
}

impl ProofOfWork {
    pub fn new(difficulty: u8) -> Self {
        ProofOfWork {
            difficulty,
            workers: 1,
        }
    }

    /// Searches with `workers` threads over disjoint nonce sequences
    pub fn with_workers(self, workers: usize) -> Self {
        ProofOfWork {
            workers: workers.max(1),
            ..self
        }
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Searches for a nonce that makes `block` meet the difficulty target
    ///
    /// The search starts at nonce 0. On cancellation the block is dropped and
    /// nothing outside this call is touched.
    pub fn mine(&self, block: Block, cancel: &CancellationToken) -> Result<Mined, MiningError> {
        let result = if self.workers == 1 {
            self.mine_single(block, cancel)
        } else {
            self.mine_parallel(block, cancel)
        };

        if let Ok(mined) = &result {
            debug!(
                "Mined block {} with nonce {} after {} attempts",
                mined.block.index, mined.block.nonce, mined.attempts
            );
        }

        result
    }

    fn mine_single(&self, mut block: Block, cancel: &CancellationToken) -> Result<Mined, MiningError> {
        let prefix = block.header_prefix();
        let mut nonce = 0u64;
        let mut attempts = 0u64;

        loop {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(MiningError::Cancelled { attempts });
            }

            let hash = hash_header(&prefix, nonce);
            attempts += 1;

            if meets_difficulty(&hash, self.difficulty) {
                block.nonce = nonce;
                block.hash = hash;
                return Ok(Mined { block, attempts });
            }

            nonce = nonce.checked_add(1).ok_or(MiningError::NonceSpaceExhausted)?;
        }
    }

    fn mine_parallel(&self, mut block: Block, cancel: &CancellationToken) -> Result<Mined, MiningError> {
        let prefix = block.header_prefix();
        let difficulty = self.difficulty;
        let step = self.workers as u64;

        let found = AtomicBool::new(false);
        let attempts_total = AtomicU64::new(0);
        let winner: Mutex<Option<(u64, Hash)>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker_id in 0..self.workers {
                let prefix = &prefix;
                let found = &found;
                let attempts_total = &attempts_total;
                let winner = &winner;

                scope.spawn(move || {
                    let mut nonce = worker_id as u64;
                    let mut attempts = 0u64;

                    loop {
                        if found.load(Ordering::Relaxed) {
                            break;
                        }
                        if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                            break;
                        }

                        let hash = hash_header(prefix, nonce);
                        attempts += 1;

                        if meets_difficulty(&hash, difficulty) {
                            // Only the first worker to flip the flag publishes its nonce
                            if !found.swap(true, Ordering::AcqRel) {
                                *winner.lock() = Some((nonce, hash));
                            }
                            break;
                        }

                        match nonce.checked_add(step) {
                            Some(next) => nonce = next,
                            None => break,
                        }
                    }

                    attempts_total.fetch_add(attempts, Ordering::Relaxed);
                });
            }
        });

        let attempts = attempts_total.into_inner();

        match winner.into_inner() {
            Some((nonce, hash)) => {
                block.nonce = nonce;
                block.hash = hash;
                Ok(Mined { block, attempts })
            }
            None if cancel.is_cancelled() => Err(MiningError::Cancelled { attempts }),
            None => Err(MiningError::NonceSpaceExhausted),
        }
    }
}

/// Builds the block following `previous_block` and mines it on the current thread
pub fn mine_block(
    transactions: Vec<Transaction>,
    previous_block: &Block,
    difficulty: u8,
) -> Result<Block, BlockError> {
    let mined = mine_next(
        transactions,
        previous_block,
        &ProofOfWork::new(difficulty),
        &CancellationToken::new(),
    )?;

    Ok(mined.block)
}

/// Builds the block following `previous_block` and mines it with `pow`
pub fn mine_next(
    transactions: Vec<Transaction>,
    previous_block: &Block,
    pow: &ProofOfWork,
    cancel: &CancellationToken,
) -> Result<Mined, BlockError> {
    let block = Block::new(previous_block.index + 1, previous_block.hash, transactions)?;
    Ok(pow.mine(block, cancel)?)
}
