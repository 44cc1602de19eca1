//! Process-scoped secure storage for the local key pair
//!
//! Private keys are never persisted across devices (out of scope), so
//! the only shipped implementation keeps them in memory for the
//! lifetime of the process. The trait boundary exists so a platform
//! keychain can be slotted in without touching the service.

use super::user_id::UserId;
use crate::core_crypto::EcdhKeypair;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Keystore errors
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("Key not found for user: {0}")]
    NotFound(UserId),

    #[error("Keystore unavailable: {0}")]
    Unavailable(String),
}

/// Abstract secret keystore
pub trait SecretKeystore: Send + Sync {
    /// Load the key pair stored for `user_id`, if any
    fn load(&self, user_id: &UserId) -> Result<Option<EcdhKeypair>, KeystoreError>;

    /// Store the key pair for `user_id`, replacing any previous one
    fn store(&self, user_id: &UserId, keypair: &EcdhKeypair) -> Result<(), KeystoreError>;

    /// Remove the key pair for `user_id`
    fn remove(&self, user_id: &UserId) -> Result<(), KeystoreError>;
}

/// In-memory keystore, scoped to the process
#[derive(Default)]
pub struct MemoryKeystore {
    keys: RwLock<HashMap<UserId, EcdhKeypair>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretKeystore for MemoryKeystore {
    fn load(&self, user_id: &UserId) -> Result<Option<EcdhKeypair>, KeystoreError> {
        let keys = self
            .keys
            .read()
            .map_err(|e| KeystoreError::Unavailable(e.to_string()))?;
        Ok(keys.get(user_id).cloned())
    }

    fn store(&self, user_id: &UserId, keypair: &EcdhKeypair) -> Result<(), KeystoreError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| KeystoreError::Unavailable(e.to_string()))?;
        keys.insert(user_id.clone(), keypair.clone());
        Ok(())
    }

    fn remove(&self, user_id: &UserId) -> Result<(), KeystoreError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|e| KeystoreError::Unavailable(e.to_string()))?;
        keys.remove(user_id);
        Ok(())
    }
}
