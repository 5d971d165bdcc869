use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::crypto::{Address, CryptoError, DigitalSignature, PrivateKey, SignatureScheme};
use super::hash::{hash_bytes, Hash};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature on transaction {0}")]
    InvalidSignature(String),

    #[error("Private key does not belong to sender {0}")]
    KeyMismatch(Address),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A signed statement that `sender` pays `amount` to `receiver`
///
/// Transactions are produced already signed and are never re-signed; any later change to
/// a field invalidates both the signature and the Merkle root of the enclosing block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Sender's public key
    pub sender: Address,

    /// Receiver's public key
    pub receiver: Address,

    /// Amount being transferred
    pub amount: u64,

    /// Signature over the canonical encoding, made with the sender's private key
    pub signature: DigitalSignature,
}

impl Transaction {
    /// Creates and signs a transaction
    ///
    /// Fails with [`TransactionError::KeyMismatch`] when `private_key` does not produce
    /// signatures that verify under `sender`.
    ///
    /// # Arguments
    ///
    /// * `sender` - The sender's address
    /// * `receiver` - The receiver's address
    /// * `amount` - The amount to transfer
    /// * `private_key` - The sender's private key
    /// * `scheme` - The signature scheme to sign with
    pub fn create<S: SignatureScheme>(
        sender: Address,
        receiver: Address,
        amount: u64,
        private_key: &PrivateKey,
        scheme: &S,
    ) -> Result<Self, TransactionError> {
        let id = Uuid::new_v4().to_string();
        let message = canonical_encoding(&id, &sender, &receiver, amount);
        let signature = scheme.sign(&message, private_key)?;

        if !scheme.verify(&message, &signature, &sender) {
            return Err(TransactionError::KeyMismatch(sender));
        }

        Ok(Transaction {
            id,
            sender,
            receiver,
            amount,
            signature,
        })
    }

    /// The byte string that is signed and hashed
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_encoding(&self.id, &self.sender, &self.receiver, self.amount)
    }

    /// Leaf hash of this transaction in a Merkle tree
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.canonical_bytes())
    }

    /// Checks the signature against the sender's public key
    pub fn verify_signature<S: SignatureScheme>(&self, scheme: &S) -> Result<(), TransactionError> {
        if scheme.verify(&self.canonical_bytes(), &self.signature, &self.sender) {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature(self.id.clone()))
        }
    }
}

/// Length-prefixed, order-preserving encoding of the signed fields
fn canonical_encoding(id: &str, sender: &Address, receiver: &Address, amount: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(id.len() + sender.0.len() + receiver.0.len() + 32);
    for field in [id.as_bytes(), sender.0.as_bytes(), receiver.0.as_bytes()] {
        buf.extend_from_slice(&(field.len() as u64).to_be_bytes());
        buf.extend_from_slice(field);
    }
    buf.extend_from_slice(&amount.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{Ed25519, KeyPairGenerator};

    #[test]
    fn test_create_transaction() {
        let sender = Ed25519.generate_key_pair().unwrap();
        let receiver = Ed25519.generate_key_pair().unwrap();

        let transaction = Transaction::create(
            sender.public_key.clone(),
            receiver.public_key.clone(),
            10,
            &sender.private_key,
            &Ed25519,
        )
        .unwrap();

        assert_eq!(transaction.sender, sender.public_key);
        assert_eq!(transaction.receiver, receiver.public_key);
        assert_eq!(transaction.amount, 10);
        assert!(!transaction.id.is_empty());
        assert!(transaction.verify_signature(&Ed25519).is_ok());
    }

    #[test]
    fn test_create_with_foreign_key_is_rejected() {
        let sender = Ed25519.generate_key_pair().unwrap();
        let receiver = Ed25519.generate_key_pair().unwrap();

        let result = Transaction::create(
            sender.public_key.clone(),
            receiver.public_key.clone(),
            10,
            &receiver.private_key,
            &Ed25519,
        );

        assert!(matches!(result, Err(TransactionError::KeyMismatch(addr)) if addr == sender.public_key));
    }

    #[test]
    fn test_altered_transaction_fails_verification() {
        let sender = Ed25519.generate_key_pair().unwrap();
        let receiver = Ed25519.generate_key_pair().unwrap();

        let mut transaction = Transaction::create(
            sender.public_key.clone(),
            receiver.public_key.clone(),
            10,
            &sender.private_key,
            &Ed25519,
        )
        .unwrap();

        transaction.amount = 1_000;
        assert!(matches!(
            transaction.verify_signature(&Ed25519),
            Err(TransactionError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_every_field_feeds_the_hash() {
        let sender = Ed25519.generate_key_pair().unwrap();
        let receiver = Ed25519.generate_key_pair().unwrap();

        let transaction = Transaction::create(
            sender.public_key.clone(),
            receiver.public_key.clone(),
            10,
            &sender.private_key,
            &Ed25519,
        )
        .unwrap();
        let original = transaction.hash();

        let mut changed = transaction.clone();
        changed.amount = 11;
        assert_ne!(changed.hash(), original);

        let mut changed = transaction.clone();
        changed.receiver = sender.public_key.clone();
        assert_ne!(changed.hash(), original);

        let mut changed = transaction.clone();
        changed.sender = receiver.public_key.clone();
        assert_ne!(changed.hash(), original);

        let mut changed = transaction.clone();
        changed.id = Uuid::new_v4().to_string();
        assert_ne!(changed.hash(), original);

        assert_eq!(transaction.hash(), original);
    }

    #[test]
    fn test_canonical_encoding_is_unambiguous() {
        // Shifting bytes between adjacent fields must not yield the same encoding
        let a = canonical_encoding("ab", &Address("c".to_string()), &Address("d".to_string()), 1);
        let b = canonical_encoding("a", &Address("bc".to_string()), &Address("d".to_string()), 1);
        assert_ne!(a, b);
    }
}
