// Blockchain module
//
// This module contains the integrity engine of the ledger:
// - Hashing and Merkle commitments
// - Signature capability and users
// - Blocks and proof of work
// - The append-only chain and the shared ledger around it
// - Persistent storage

pub mod block;
pub mod chain;
pub mod crypto;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod pow;
pub mod storage;
pub mod transaction;
pub mod user;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{Blockchain, ChainError};
pub use crypto::{Address, DigitalSignature, Ed25519, KeyPair, KeyPairGenerator, PrivateKey, SignatureScheme};
pub use hash::Hash;
pub use ledger::{InclusionProof, Ledger, LedgerError};
pub use merkle::{verify_proof, MerkleProof, MerkleTree};
pub use pow::{mine_block, CancellationToken, Mined, ProofOfWork};
pub use transaction::Transaction;
pub use user::User;
