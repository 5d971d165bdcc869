use super::crypto::{
    Address, CryptoError, DigitalSignature, Ed25519, KeyPair, KeyPairGenerator, PrivateKey,
    SignatureScheme,
};
use super::transaction::{Transaction, TransactionError};

/// A named participant holding a key pair
///
/// The private key stays inside the user; callers sign through [`User::sign`] and
/// [`User::create_transaction`].
#[derive(Debug, Clone)]
pub struct User<S: SignatureScheme = Ed25519> {
    name: String,
    key_pair: KeyPair,
    scheme: S,
}

impl<S: SignatureScheme + KeyPairGenerator> User<S> {
    /// Creates a user with a freshly generated key pair
    ///
    /// # Arguments
    ///
    /// * `name` - Display name of the user
    /// * `scheme` - Scheme that generates the key pair and signs
    pub fn new(name: impl Into<String>, scheme: S) -> Result<Self, CryptoError> {
        let key_pair = scheme.generate_key_pair()?;

        Ok(User {
            name: name.into(),
            key_pair,
            scheme,
        })
    }

    /// Restores a user from an existing private key
    pub fn from_private_key(
        name: impl Into<String>,
        private_key: PrivateKey,
        scheme: S,
    ) -> Result<Self, CryptoError> {
        let public_key = scheme.public_key(&private_key)?;

        Ok(User {
            name: name.into(),
            key_pair: KeyPair {
                public_key,
                private_key,
            },
            scheme,
        })
    }
}

impl<S: SignatureScheme> User<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the user's public key
    pub fn address(&self) -> &Address {
        &self.key_pair.public_key
    }

    /// Signs a message with the user's private key
    pub fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        self.scheme.sign(message, &self.key_pair.private_key)
    }

    /// Creates a signed transaction paying `amount` to `receiver`
    pub fn create_transaction(
        &self,
        receiver: &Address,
        amount: u64,
    ) -> Result<Transaction, TransactionError> {
        Transaction::create(
            self.key_pair.public_key.clone(),
            receiver.clone(),
            amount,
            &self.key_pair.private_key,
            &self.scheme,
        )
    }

    /// Exports the private key so it can be handed back to its owner
    pub fn export_private_key(&self) -> &PrivateKey {
        &self.key_pair.private_key
    }
}
