//! Key envelopes: the group key wrapped for one recipient

use super::errors::GroupKeyError;
use crate::core_crypto::{CryptoProvider, SealedBox, SymmetricKey};
use crate::core_keys::UserId;
use serde::{Deserialize, Serialize};

/// Label expanded into the per-pair wrapping key; the epoch is
/// appended so wrapping keys differ across epochs for the same pair.
const WRAP_INFO_LABEL: &[u8] = b"group key wrap/";

/// The group key for one epoch, AEAD-encrypted under the ECDH pair key
/// between `sender_id` and `recipient_id`
///
/// `sender_id` identifies whose public key the recipient must combine
/// with their own private key to re-derive the wrapping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub epoch: u64,
    pub recipient_id: UserId,
    pub sender_id: UserId,
    /// Ciphertext of the raw group key, GCM tag appended
    pub wrapped_key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl KeyEnvelope {
    /// HKDF info for the wrapping key of `epoch`
    pub(crate) fn wrap_info(epoch: u64) -> Vec<u8> {
        let mut info = Vec::with_capacity(WRAP_INFO_LABEL.len() + 8);
        info.extend_from_slice(WRAP_INFO_LABEL);
        info.extend_from_slice(&epoch.to_be_bytes());
        info
    }

    /// AAD binding the envelope to its epoch and recipient
    pub(crate) fn aad(epoch: u64, recipient_id: &UserId) -> Vec<u8> {
        let mut aad = Vec::with_capacity(8 + recipient_id.as_bytes().len());
        aad.extend_from_slice(&epoch.to_be_bytes());
        aad.extend_from_slice(recipient_id.as_bytes());
        aad
    }

    /// Seal `group_key` for `recipient_id` under `pair_key`
    pub fn seal(
        provider: &dyn CryptoProvider,
        pair_key: &SymmetricKey,
        group_key: &SymmetricKey,
        epoch: u64,
        sender_id: UserId,
        recipient_id: UserId,
    ) -> Result<Self, GroupKeyError> {
        let aad = Self::aad(epoch, &recipient_id);
        let sealed = provider
            .seal(pair_key, group_key.as_bytes(), &aad)
            .map_err(|e| GroupKeyError::Wrap { user_id: recipient_id.clone(), reason: e.to_string() })?;

        Ok(Self {
            epoch,
            recipient_id,
            sender_id,
            wrapped_key: sealed.ciphertext,
            iv: sealed.nonce,
        })
    }

    /// Recover the group key using the recipient-side `pair_key`
    pub fn open(
        &self,
        provider: &dyn CryptoProvider,
        pair_key: &SymmetricKey,
    ) -> Result<SymmetricKey, GroupKeyError> {
        let aad = Self::aad(self.epoch, &self.recipient_id);
        let sealed = SealedBox { nonce: self.iv.clone(), ciphertext: self.wrapped_key.clone() };

        let raw = provider
            .open(pair_key, &sealed, &aad)
            .map_err(|e| GroupKeyError::Unwrap(e.to_string()))?;

        SymmetricKey::from_slice(&raw)
            .map_err(|e| GroupKeyError::Unwrap(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::{DalekCryptoProvider, KEY_SIZE};

    fn pair_key() -> SymmetricKey {
        SymmetricKey::new([9u8; KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let provider = DalekCryptoProvider::new();
        let group_key = SymmetricKey::new([0x42; KEY_SIZE]);

        let env = KeyEnvelope::seal(
            &provider,
            &pair_key(),
            &group_key,
            3,
            UserId::from("alice"),
            UserId::from("bob"),
        )
        .unwrap();

        assert_eq!(env.epoch, 3);
        let recovered = env.open(&provider, &pair_key()).unwrap();
        assert_eq!(recovered.as_bytes(), group_key.as_bytes());
    }

    #[test]
    fn test_open_fails_with_wrong_pair_key() {
        let provider = DalekCryptoProvider::new();
        let group_key = SymmetricKey::new([0x42; KEY_SIZE]);

        let env = KeyEnvelope::seal(
            &provider,
            &pair_key(),
            &group_key,
            1,
            UserId::from("alice"),
            UserId::from("bob"),
        )
        .unwrap();

        let wrong = SymmetricKey::new([8u8; KEY_SIZE]);
        assert!(env.open(&provider, &wrong).is_err());
    }

    #[test]
    fn test_tampered_epoch_breaks_aad_binding() {
        let provider = DalekCryptoProvider::new();
        let group_key = SymmetricKey::new([0x42; KEY_SIZE]);

        let mut env = KeyEnvelope::seal(
            &provider,
            &pair_key(),
            &group_key,
            1,
            UserId::from("alice"),
            UserId::from("bob"),
        )
        .unwrap();

        env.epoch = 2;
        assert!(env.open(&provider, &pair_key()).is_err());
    }

    #[test]
    fn test_tampered_recipient_breaks_aad_binding() {
        let provider = DalekCryptoProvider::new();
        let group_key = SymmetricKey::new([0x42; KEY_SIZE]);

        let mut env = KeyEnvelope::seal(
            &provider,
            &pair_key(),
            &group_key,
            1,
            UserId::from("alice"),
            UserId::from("bob"),
        )
        .unwrap();

        env.recipient_id = UserId::from("mallory");
        assert!(env.open(&provider, &pair_key()).is_err());
    }

    #[test]
    fn test_fresh_iv_per_envelope() {
        let provider = DalekCryptoProvider::new();
        let group_key = SymmetricKey::new([0x42; KEY_SIZE]);

        let seal = || {
            KeyEnvelope::seal(
                &provider,
                &pair_key(),
                &group_key,
                1,
                UserId::from("alice"),
                UserId::from("bob"),
            )
            .unwrap()
        };
        assert_ne!(seal().iv, seal().iv);
    }

    #[test]
    fn test_wrap_info_differs_per_epoch() {
        assert_ne!(KeyEnvelope::wrap_info(1), KeyEnvelope::wrap_info(2));
    }
}
