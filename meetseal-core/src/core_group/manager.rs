//! Group key manager: generation, wrapping, rotation

use super::envelope::KeyEnvelope;
use super::errors::GroupKeyError;
use super::group_key::{EpochKeyCache, GroupKey};
use super::types::{GroupMember, MeetingId, Roster};
use crate::core_crypto::{CryptoProvider, SymmetricKey, KEY_SIZE};
use crate::core_keys::{KeyManagementService, UserId};
use rand::{rngs::OsRng, TryRngCore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one rotation
#[derive(Debug)]
pub struct RotationOutcome {
    /// The epoch that is now current
    pub epoch: u64,
    /// One envelope per remote member that could be wrapped for
    pub envelopes: Vec<KeyEnvelope>,
    /// Members excluded from this epoch (wrap failure or missing key)
    pub skipped: Vec<UserId>,
}

impl RotationOutcome {
    /// True when at least one roster member was left out of the epoch
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Maintains the current group key and its distribution to members
pub struct GroupKeyManager {
    meeting_id: MeetingId,
    cache: EpochKeyCache,
    provider: Arc<dyn CryptoProvider>,
    /// Highest epoch seen, surviving resets so epochs never regress
    last_epoch: u64,
}

impl GroupKeyManager {
    pub fn new(
        meeting_id: MeetingId,
        provider: Arc<dyn CryptoProvider>,
        epoch_cache_size: usize,
    ) -> Self {
        Self {
            meeting_id,
            cache: EpochKeyCache::new(epoch_cache_size),
            provider,
            last_epoch: 0,
        }
    }

    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    /// Fresh 256-bit key material for the next epoch
    ///
    /// The key is not installed here; [`rotate`](Self::rotate) installs
    /// it only once every envelope has been constructed.
    pub fn generate_group_key(&self) -> Result<GroupKey, GroupKeyError> {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
            GroupKeyError::Key(crate::core_keys::KeyError::KeyGeneration(format!(
                "OS RNG unavailable: {}",
                e
            )))
        })?;

        let epoch = self.last_epoch.max(self.cache.current_epoch().unwrap_or(0)) + 1;
        Ok(GroupKey {
            epoch,
            key: SymmetricKey::new(bytes),
            created_at: crate::core_keys::now_millis(),
        })
    }

    /// Wrap `group_key` for one member under the ECDH pair key
    pub fn wrap_for_member(
        &self,
        keys: &KeyManagementService,
        member: &GroupMember,
        group_key: &GroupKey,
    ) -> Result<KeyEnvelope, GroupKeyError> {
        let info = KeyEnvelope::wrap_info(group_key.epoch);
        let pair_key = keys
            .derive_pair_key(&member.public_key, &info)
            .map_err(|e| GroupKeyError::Wrap {
                user_id: member.user_id.clone(),
                reason: e.to_string(),
            })?;

        KeyEnvelope::seal(
            self.provider.as_ref(),
            &pair_key,
            &group_key.key,
            group_key.epoch,
            keys.user_id()?.clone(),
            member.user_id.clone(),
        )
    }

    /// Rotate the group key for `roster`
    ///
    /// Generates the next epoch, wraps it for every remote roster
    /// member, and installs it as current only after all envelopes are
    /// built. A member whose wrap fails is excluded from the epoch and
    /// reported in `skipped`; the rotation itself still succeeds.
    pub fn rotate(
        &mut self,
        keys: &KeyManagementService,
        roster: &Roster,
    ) -> Result<RotationOutcome, GroupKeyError> {
        let local_user = keys.user_id()?.clone();
        let group_key = self.generate_group_key()?;

        let mut envelopes = Vec::with_capacity(roster.len().saturating_sub(1));
        let mut skipped = Vec::new();

        for member in roster.members() {
            if member.user_id == local_user {
                // The local user holds the key directly.
                continue;
            }
            match self.wrap_for_member(keys, member, &group_key) {
                Ok(env) => envelopes.push(env),
                Err(e) => {
                    warn!(
                        meeting = %self.meeting_id,
                        user = %member.user_id,
                        error = %e,
                        "Excluding member from new epoch"
                    );
                    skipped.push(member.user_id.clone());
                }
            }
        }

        // All envelopes constructed: the epoch may now become current.
        let epoch = group_key.epoch;
        self.cache.install(group_key);
        self.last_epoch = self.last_epoch.max(epoch);

        info!(
            meeting = %self.meeting_id,
            epoch,
            envelopes = envelopes.len(),
            skipped = skipped.len(),
            "Rotated group key"
        );

        Ok(RotationOutcome { epoch, envelopes, skipped })
    }

    /// Recipient side: unwrap an inbound envelope and install its key
    ///
    /// Returns the envelope's epoch. Adopts the epoch as current when
    /// it is newer than what we hold; older epochs land in the
    /// superseded cache.
    pub fn install_envelope(
        &mut self,
        keys: &KeyManagementService,
        sender_public: &crate::core_crypto::PublicKey,
        envelope: &KeyEnvelope,
    ) -> Result<u64, GroupKeyError> {
        let local_user = keys.user_id()?;
        if &envelope.recipient_id != local_user {
            return Err(GroupKeyError::WrongRecipient {
                recipient: envelope.recipient_id.clone(),
            });
        }

        let info = KeyEnvelope::wrap_info(envelope.epoch);
        let pair_key = keys
            .derive_pair_key(sender_public, &info)
            .map_err(|e| GroupKeyError::Unwrap(e.to_string()))?;
        let key = envelope.open(self.provider.as_ref(), &pair_key)?;

        match self.cache.current_epoch() {
            Some(current) if envelope.epoch <= current => {
                debug!(
                    meeting = %self.meeting_id,
                    epoch = envelope.epoch,
                    current,
                    "Installed superseded epoch key"
                );
                self.cache.insert_superseded(envelope.epoch, key);
            }
            _ => {
                self.cache.install(GroupKey {
                    epoch: envelope.epoch,
                    key,
                    created_at: crate::core_keys::now_millis(),
                });
                info!(meeting = %self.meeting_id, epoch = envelope.epoch, "Adopted group key epoch");
            }
        }
        self.last_epoch = self.last_epoch.max(envelope.epoch);

        Ok(envelope.epoch)
    }

    pub fn current(&self) -> Option<&GroupKey> {
        self.cache.current()
    }

    pub fn current_epoch(&self) -> Option<u64> {
        self.cache.current_epoch()
    }

    pub fn cache(&self) -> &EpochKeyCache {
        &self.cache
    }

    /// Drop all key state (retry-from-scratch path)
    ///
    /// The epoch counter survives so a post-reset rotation continues
    /// the sequence instead of reissuing old epoch numbers.
    pub fn reset(&mut self) {
        self.cache.reset();
    }
}
