//! Key management service

use super::directory::{KeyDirectory, UserPublicKey};
use super::errors::KeyError;
use super::keystore::SecretKeystore;
use super::user_id::UserId;
use crate::core_crypto::{CryptoProvider, EcdhKeypair, PublicKey, SymmetricKey};
use crate::metrics::record_counter;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Owns the local user's key pair and all access to it
///
/// The private key is held exclusively here; other components obtain
/// derived pair keys through [`derive_pair_key`](Self::derive_pair_key)
/// and never the key itself.
pub struct KeyManagementService {
    user_id: Option<UserId>,
    keypair: Option<EcdhKeypair>,
    keystore: Arc<dyn SecretKeystore>,
    directory: Arc<dyn KeyDirectory>,
    provider: Arc<dyn CryptoProvider>,
}

impl KeyManagementService {
    pub fn new(
        keystore: Arc<dyn SecretKeystore>,
        directory: Arc<dyn KeyDirectory>,
        provider: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self { user_id: None, keypair: None, keystore, directory, provider }
    }

    /// Load or generate the key pair for `user_id`; idempotent
    ///
    /// The public half is published to the directory best-effort: a
    /// publish failure is logged and the service still comes up, since
    /// the key exists locally.
    pub async fn initialize(&mut self, user_id: UserId) -> Result<(), KeyError> {
        if self.keypair.is_some() && self.user_id.as_ref() == Some(&user_id) {
            debug!(user = %user_id, "Key pair already initialized");
            return Ok(());
        }

        let keypair = match self.keystore.load(&user_id)? {
            Some(kp) => {
                debug!(user = %user_id, "Loaded existing key pair from keystore");
                kp
            }
            None => {
                let kp = self.provider.generate_keypair()?;
                self.keystore.store(&user_id, &kp)?;
                record_counter("keys.generated", 1);
                info!(user = %user_id, "Generated new key pair");
                kp
            }
        };

        let record = UserPublicKey {
            user_id: user_id.clone(),
            public_key: *keypair.public_key(),
            created_at: now_millis(),
        };
        match self.directory.publish_public_key(record).await {
            Ok(()) => record_counter("keys.published", 1),
            Err(e) => {
                warn!(user = %user_id, error = %e, "Failed to publish public key; continuing");
            }
        }

        self.user_id = Some(user_id);
        self.keypair = Some(keypair);
        Ok(())
    }

    /// The local user's public key
    pub fn public_key(&self) -> Result<PublicKey, KeyError> {
        self.keypair
            .as_ref()
            .map(|kp| *kp.public_key())
            .ok_or(KeyError::NotInitialized)
    }

    /// The local user's id, once initialized
    pub fn user_id(&self) -> Result<&UserId, KeyError> {
        self.user_id.as_ref().ok_or(KeyError::NotInitialized)
    }

    /// Fetch public keys for remote users from the directory
    ///
    /// Best-effort: returns the resolved subset. Users without a
    /// published key are logged and skipped; the caller treats them as
    /// excluded from the epoch being built.
    pub async fn fetch_public_keys(&self, user_ids: &[UserId]) -> Vec<UserPublicKey> {
        match self.directory.fetch_public_keys(user_ids).await {
            Ok(records) => {
                if records.len() < user_ids.len() {
                    let resolved: Vec<&UserId> = records.iter().map(|r| &r.user_id).collect();
                    for missing in user_ids.iter().filter(|id| !resolved.contains(id)) {
                        warn!(user = %missing, "No public key published; member excluded");
                    }
                }
                records
            }
            Err(e) => {
                warn!(error = %e, "Public key fetch failed; treating all lookups as missing");
                Vec::new()
            }
        }
    }

    /// Derive a symmetric pair key via ECDH with `peer`, expanded over
    /// `info`
    ///
    /// This is the only operation that touches the private key.
    pub fn derive_pair_key(
        &self,
        peer: &PublicKey,
        info: &[u8],
    ) -> Result<SymmetricKey, KeyError> {
        let keypair = self.keypair.as_ref().ok_or(KeyError::NotInitialized)?;
        Ok(self.provider.derive_pair_key(keypair, peer, info)?)
    }

    /// Drop the local key material (logout)
    pub fn clear(&mut self) -> Result<(), KeyError> {
        if let Some(user_id) = self.user_id.take() {
            self.keystore.remove(&user_id)?;
            info!(user = %user_id, "Cleared local key material");
        }
        self.keypair = None;
        Ok(())
    }

    pub fn provider(&self) -> Arc<dyn CryptoProvider> {
        Arc::clone(&self.provider)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
