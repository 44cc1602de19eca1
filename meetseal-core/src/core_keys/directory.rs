//! Public-key directory collaborator
//!
//! The directory is whatever server-side store the surrounding system
//! provides for published public keys. Lookups are best-effort:
//! partial results are expected, individual misses are not fatal.

use super::user_id::UserId;
use crate::core_crypto::PublicKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Directory errors (non-fatal for individual lookups)
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),
}

/// A published public key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPublicKey {
    pub user_id: UserId,
    pub public_key: PublicKey,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

/// Abstract public-key directory
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Publish (or replace) the caller's public key record
    async fn publish_public_key(&self, record: UserPublicKey) -> Result<(), DirectoryError>;

    /// Fetch public keys for the given users
    ///
    /// Returns only the subset that resolved; missing users are simply
    /// absent from the result.
    async fn fetch_public_keys(
        &self,
        user_ids: &[UserId],
    ) -> Result<Vec<UserPublicKey>, DirectoryError>;
}

/// In-memory directory for tests and the loopback demo
#[derive(Default)]
pub struct MemoryDirectory {
    records: RwLock<HashMap<UserId, UserPublicKey>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a record, simulating an unresolvable member
    pub async fn unpublish(&self, user_id: &UserId) {
        self.records.write().await.remove(user_id);
    }
}

#[async_trait]
impl KeyDirectory for MemoryDirectory {
    async fn publish_public_key(&self, record: UserPublicKey) -> Result<(), DirectoryError> {
        self.records.write().await.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn fetch_public_keys(
        &self,
        user_ids: &[UserId],
    ) -> Result<Vec<UserPublicKey>, DirectoryError> {
        let records = self.records.read().await;
        Ok(user_ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}
