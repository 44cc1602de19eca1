//! Error types for key management

use super::keystore::KeystoreError;
use crate::core_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur in key management
#[derive(Debug, Error)]
pub enum KeyError {
    /// The underlying cryptographic primitive failed to produce a key pair
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// An operation requiring the local key pair was called before `initialize`
    #[error("Key management service not initialized")]
    NotInitialized,

    /// Keystore access failed
    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    /// Pair-key derivation failed
    #[error("Key derivation failed: {0}")]
    Derivation(String),
}

impl From<CryptoError> for KeyError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyGeneration(msg) => KeyError::KeyGeneration(msg),
            other => KeyError::Derivation(other.to_string()),
        }
    }
}
