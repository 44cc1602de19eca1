//! Message encryption under the group key
//!
//! Encrypts chat payloads with AES-256-GCM under the current epoch's
//! group key and decrypts inbound messages against the epoch key
//! cache. The GCM tag travels as a separate field; AAD binds each
//! message to its epoch and sender so neither can be swapped without
//! failing verification.

use crate::core_crypto::{CryptoProvider, SealedBox, TAG_SIZE};
use crate::core_group::{EpochKeyCache, GroupKey};
use crate::core_keys::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors from message encryption and decryption
#[derive(Debug, Error)]
pub enum CipherError {
    /// Encryption failed (no key, RNG failure, cipher error)
    #[error("Message encryption failed: {0}")]
    Encryption(String),

    /// No key held for the message's epoch
    #[error("No group key for epoch {0}")]
    UnknownEpoch(u64),

    /// Tag or AAD verification failed
    #[error("Message authentication failed")]
    AuthenticationFailed,

    /// Message fields are structurally invalid
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// An encrypted chat message as it travels over the transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub id: Uuid,
    /// Epoch whose group key encrypted this message
    pub epoch: u64,
    pub sender_id: UserId,
    pub ciphertext: Vec<u8>,
    /// 96-bit GCM nonce
    pub iv: Vec<u8>,
    /// 128-bit GCM tag, detached from the ciphertext
    pub auth_tag: Vec<u8>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Stateless message encryptor/decryptor
///
/// Key material lives in [`EpochKeyCache`]; the cipher only borrows it
/// per call.
pub struct MessageCipher {
    provider: Arc<dyn CryptoProvider>,
}

impl MessageCipher {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    fn aad(epoch: u64, sender_id: &UserId) -> Vec<u8> {
        let mut aad = Vec::with_capacity(8 + sender_id.as_bytes().len());
        aad.extend_from_slice(&epoch.to_be_bytes());
        aad.extend_from_slice(sender_id.as_bytes());
        aad
    }

    /// Encrypt `plaintext` under `group_key` for `sender_id`
    pub fn encrypt(
        &self,
        group_key: &GroupKey,
        sender_id: &UserId,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, CipherError> {
        let aad = Self::aad(group_key.epoch, sender_id);
        let sealed = self
            .provider
            .seal(&group_key.key, plaintext, &aad)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        // Detach the GCM tag from the end of the ciphertext.
        if sealed.ciphertext.len() < TAG_SIZE {
            return Err(CipherError::Encryption("Ciphertext shorter than tag".to_string()));
        }
        let split = sealed.ciphertext.len() - TAG_SIZE;
        let (body, tag) = sealed.ciphertext.split_at(split);

        Ok(EncryptedMessage {
            id: Uuid::new_v4(),
            epoch: group_key.epoch,
            sender_id: sender_id.clone(),
            ciphertext: body.to_vec(),
            iv: sealed.nonce,
            auth_tag: tag.to_vec(),
            timestamp: crate::core_keys::now_millis(),
        })
    }

    /// Decrypt `message` against the epoch key cache
    ///
    /// Fails with [`CipherError::UnknownEpoch`] when the message's
    /// epoch is neither current nor retained as superseded.
    pub fn decrypt(
        &self,
        cache: &EpochKeyCache,
        message: &EncryptedMessage,
    ) -> Result<Vec<u8>, CipherError> {
        let key = cache
            .key_for_epoch(message.epoch)
            .ok_or(CipherError::UnknownEpoch(message.epoch))?;

        if message.auth_tag.len() != TAG_SIZE {
            return Err(CipherError::Malformed(format!(
                "Auth tag must be {} bytes, got {}",
                TAG_SIZE,
                message.auth_tag.len()
            )));
        }

        let mut ciphertext = Vec::with_capacity(message.ciphertext.len() + TAG_SIZE);
        ciphertext.extend_from_slice(&message.ciphertext);
        ciphertext.extend_from_slice(&message.auth_tag);
        let sealed = SealedBox { nonce: message.iv.clone(), ciphertext };

        let aad = Self::aad(message.epoch, &message.sender_id);
        let plaintext = self.provider.open(key, &sealed, &aad).map_err(|e| {
            debug!(
                message_id = %message.id,
                epoch = message.epoch,
                sender = %message.sender_id,
                error = %e,
                "Message failed authentication"
            );
            CipherError::AuthenticationFailed
        })?;

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::{DalekCryptoProvider, SymmetricKey, KEY_SIZE};
    use proptest::prelude::*;

    fn cipher() -> MessageCipher {
        MessageCipher::new(Arc::new(DalekCryptoProvider::new()))
    }

    fn group_key(epoch: u64, byte: u8) -> GroupKey {
        GroupKey { epoch, key: SymmetricKey::new([byte; KEY_SIZE]), created_at: 0 }
    }

    fn cache_with(keys: &[&GroupKey]) -> EpochKeyCache {
        let mut cache = EpochKeyCache::new(3);
        for key in keys {
            cache.install((*key).clone());
        }
        cache
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = cipher();
        let gk = group_key(1, 0x11);
        let cache = cache_with(&[&gk]);
        let sender = UserId::from("alice");

        let msg = cipher.encrypt(&gk, &sender, b"hello everyone").unwrap();
        assert_eq!(msg.epoch, 1);
        assert_eq!(msg.auth_tag.len(), TAG_SIZE);

        let plaintext = cipher.decrypt(&cache, &msg).unwrap();
        assert_eq!(plaintext, b"hello everyone");
    }

    #[test]
    fn test_unknown_epoch_is_reported() {
        let cipher = cipher();
        let gk = group_key(5, 0x22);
        let cache = cache_with(&[&group_key(1, 0x33)]);

        let msg = cipher.encrypt(&gk, &UserId::from("alice"), b"late").unwrap();
        let err = cipher.decrypt(&cache, &msg).unwrap_err();
        assert!(matches!(err, CipherError::UnknownEpoch(5)));
    }

    #[test]
    fn test_superseded_epoch_still_decrypts() {
        let cipher = cipher();
        let old = group_key(1, 0x44);
        let new = group_key(2, 0x55);
        let cache = cache_with(&[&old, &new]);

        let msg = cipher.encrypt(&old, &UserId::from("bob"), b"from before").unwrap();
        assert_eq!(cipher.decrypt(&cache, &msg).unwrap(), b"from before");
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let cipher = cipher();
        let gk = group_key(1, 0x66);
        let cache = cache_with(&[&gk]);

        let mut msg = cipher.encrypt(&gk, &UserId::from("alice"), b"integrity").unwrap();
        msg.ciphertext[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&cache, &msg),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_iv_fails_authentication() {
        let cipher = cipher();
        let gk = group_key(1, 0x6A);
        let cache = cache_with(&[&gk]);

        let mut msg = cipher.encrypt(&gk, &UserId::from("alice"), b"nonce bound").unwrap();
        msg.iv[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&cache, &msg),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_swapped_sender_fails_authentication() {
        let cipher = cipher();
        let gk = group_key(1, 0x77);
        let cache = cache_with(&[&gk]);

        let mut msg = cipher.encrypt(&gk, &UserId::from("alice"), b"attribution").unwrap();
        msg.sender_id = UserId::from("mallory");
        assert!(matches!(
            cipher.decrypt(&cache, &msg),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_relabelled_epoch_fails_authentication() {
        let cipher = cipher();
        let gk = group_key(1, 0x88);
        let mut cache = cache_with(&[&gk]);
        cache.insert_superseded(2, gk.key.clone());

        let mut msg = cipher.encrypt(&gk, &UserId::from("alice"), b"epoch bound").unwrap();
        msg.epoch = 2;
        assert!(matches!(
            cipher.decrypt(&cache, &msg),
            Err(CipherError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_truncated_tag_is_malformed() {
        let cipher = cipher();
        let gk = group_key(1, 0x99);
        let cache = cache_with(&[&gk]);

        let mut msg = cipher.encrypt(&gk, &UserId::from("alice"), b"short tag").unwrap();
        msg.auth_tag.truncate(8);
        assert!(matches!(cipher.decrypt(&cache, &msg), Err(CipherError::Malformed(_))));
    }

    proptest! {
        #[test]
        fn prop_arbitrary_payloads_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let cipher = cipher();
            let gk = group_key(7, 0xAA);
            let cache = cache_with(&[&gk]);

            let msg = cipher.encrypt(&gk, &UserId::from("alice"), &payload).unwrap();
            prop_assert_eq!(cipher.decrypt(&cache, &msg).unwrap(), payload);
        }
    }
}
