use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A public key in base58 format; identifies the sender and receiver of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates an address from raw public key bytes
    pub fn from_public_key_bytes(bytes: &[u8]) -> Self {
        Address(bs58::encode(bytes).into_string())
    }

    /// Decodes the address back into public key bytes
    pub fn to_public_key_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        bs58::decode(s)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        Ok(Address(s.to_string()))
    }
}

/// A digital signature in base58 format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a signature value from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        DigitalSignature(bs58::encode(bytes).into_string())
    }

    /// Decodes the signature into raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))
    }
}

/// Opaque private key material
///
/// `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PrivateKey(bytes)
    }

    /// Parses a hex encoded private key
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        hex::decode(s)
            .map(PrivateKey)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A public/private key pair issued by a [`KeyPairGenerator`]
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: Address,
    pub private_key: PrivateKey,
}

/// The signing capability the ledger core depends on
///
/// `verify(m, sign(m, sk), pk(sk))` must always hold, and verification against any other
/// key or an altered message must fail. Malformed inputs verify as `false`.
pub trait SignatureScheme: Clone + Send + Sync + 'static {
    fn sign(&self, message: &[u8], private_key: &PrivateKey) -> Result<DigitalSignature, CryptoError>;

    fn verify(&self, message: &[u8], signature: &DigitalSignature, public_key: &Address) -> bool;
}

/// Key issuance, kept apart from [`SignatureScheme`] since the core never creates keys
pub trait KeyPairGenerator {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Derives the public key belonging to a private key
    fn public_key(&self, private_key: &PrivateKey) -> Result<Address, CryptoError>;
}

/// Ed25519 signatures backed by `ed25519-dalek`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ed25519;

impl Ed25519 {
    fn signing_key(private_key: &PrivateKey) -> Result<SigningKey, CryptoError> {
        let bytes: [u8; 32] = private_key.as_bytes().try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(SigningKey::from_bytes(&bytes))
    }

    fn verifying_key(public_key: &Address) -> Result<VerifyingKey, CryptoError> {
        let bytes: [u8; 32] = public_key.to_public_key_bytes()?.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key bytes".to_string())
        })?;

        VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl SignatureScheme for Ed25519 {
    fn sign(&self, message: &[u8], private_key: &PrivateKey) -> Result<DigitalSignature, CryptoError> {
        let signing_key = Self::signing_key(private_key)?;
        let signature = signing_key.sign(message);
        Ok(DigitalSignature::from_bytes(&signature.to_bytes()))
    }

    fn verify(&self, message: &[u8], signature: &DigitalSignature, public_key: &Address) -> bool {
        let verifying_key = match Self::verifying_key(public_key) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let signature_bytes: [u8; 64] = match signature.to_bytes().map(|b| b.try_into()) {
            Ok(Ok(bytes)) => bytes,
            _ => return false,
        };

        verifying_key
            .verify(message, &Signature::from_bytes(&signature_bytes))
            .is_ok()
    }
}

impl KeyPairGenerator for Ed25519 {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();

        Ok(KeyPair {
            public_key: Address::from_public_key_bytes(verifying_key.as_bytes()),
            private_key: PrivateKey(signing_key.to_bytes().to_vec()),
        })
    }

    fn public_key(&self, private_key: &PrivateKey) -> Result<Address, CryptoError> {
        let signing_key = Self::signing_key(private_key)?;
        Ok(Address::from_public_key_bytes(signing_key.verifying_key().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let key_pair = Ed25519.generate_key_pair().unwrap();
        assert!(!key_pair.public_key.0.is_empty());
        assert_eq!(key_pair.private_key.as_bytes().len(), 32);
    }

    #[test]
    fn test_signing_and_verification() {
        let key_pair = Ed25519.generate_key_pair().unwrap();
        let message = b"Hello, world!";

        let signature = Ed25519.sign(message, &key_pair.private_key).unwrap();
        assert!(Ed25519.verify(message, &signature, &key_pair.public_key));

        // Verify with wrong message
        assert!(!Ed25519.verify(b"Wrong message", &signature, &key_pair.public_key));
    }

    #[test]
    fn test_verification_with_other_key_fails() {
        let signer = Ed25519.generate_key_pair().unwrap();
        let other = Ed25519.generate_key_pair().unwrap();
        let message = b"pay 10";

        let signature = Ed25519.sign(message, &signer.private_key).unwrap();
        assert!(!Ed25519.verify(message, &signature, &other.public_key));
    }

    #[test]
    fn test_malformed_inputs_do_not_verify() {
        let key_pair = Ed25519.generate_key_pair().unwrap();
        let message = b"payload";

        let garbage = DigitalSignature("not-base58-0OIl".to_string());
        assert!(!Ed25519.verify(message, &garbage, &key_pair.public_key));

        let short = DigitalSignature::from_bytes(&[1, 2, 3]);
        assert!(!Ed25519.verify(message, &short, &key_pair.public_key));

        let signature = Ed25519.sign(message, &key_pair.private_key).unwrap();
        let bad_address = Address::from_public_key_bytes(&[7u8; 5]);
        assert!(!Ed25519.verify(message, &signature, &bad_address));
    }

    #[test]
    fn test_public_key_derivation() {
        let key_pair = Ed25519.generate_key_pair().unwrap();
        let derived = Ed25519.public_key(&key_pair.private_key).unwrap();
        assert_eq!(derived, key_pair.public_key);

        let restored = PrivateKey::from_hex(&key_pair.private_key.to_hex()).unwrap();
        assert_eq!(restored, key_pair.private_key);

        assert!(Ed25519.public_key(&PrivateKey::from_bytes(vec![1, 2])).is_err());
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let key_pair = Ed25519.generate_key_pair().unwrap();
        let rendered = format!("{:?}", key_pair);
        assert!(!rendered.contains(&key_pair.private_key.to_hex()));
    }
}
