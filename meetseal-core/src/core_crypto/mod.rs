//! Cryptographic primitives behind the `CryptoProvider` seam
//!
//! Everything above this module speaks in terms of the trait: key pair
//! generation, X25519 key agreement, and AEAD sealing. The default
//! implementation is backed by x25519-dalek, HKDF-SHA256 and
//! AES-256-GCM.
//!
//! Security: secret key material is zeroized on drop and redacted from
//! Debug output.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

mod provider;

pub use provider::DalekCryptoProvider;

/// Size of symmetric keys (256 bits for AES-256-GCM)
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonces (96 bits for AES-GCM)
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Errors from cryptographic primitives
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// ECDH / KDF derivation failed
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    /// AEAD encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// AEAD decryption or tag verification failed
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Malformed key or ciphertext input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; KEY_SIZE]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("Public key must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 256-bit symmetric key material
///
/// Zeroized on drop. Deliberately not serializable; raw bytes only
/// travel inside AEAD-sealed envelopes.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("Symmetric key must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(<redacted>)")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// X25519 key pair
///
/// The secret half never leaves this struct except through
/// [`CryptoProvider::derive_pair_key`].
#[derive(Clone)]
pub struct EcdhKeypair {
    public: PublicKey,
    secret: [u8; KEY_SIZE],
}

impl EcdhKeypair {
    pub fn new(public: PublicKey, secret: [u8; KEY_SIZE]) -> Self {
        Self { public, secret }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.secret
    }
}

impl fmt::Debug for EcdhKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdhKeypair")
            .field("public", &self.public.to_hex())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Drop for EcdhKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Output of an AEAD seal: fresh nonce plus ciphertext with the GCM
/// tag appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Capability interface over the cryptographic primitives
///
/// Implementable by any audited crypto backend; the rest of the crate
/// never touches curve or cipher types directly.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh X25519 key pair
    fn generate_keypair(&self) -> Result<EcdhKeypair, CryptoError>;

    /// Derive a symmetric key from ECDH(keypair.secret, peer) expanded
    /// with HKDF over `info`
    ///
    /// Deterministic for a given (pair, info) in both directions:
    /// derive(a, B, info) == derive(b, A, info).
    fn derive_pair_key(
        &self,
        keypair: &EcdhKeypair,
        peer: &PublicKey,
        info: &[u8],
    ) -> Result<SymmetricKey, CryptoError>;

    /// AEAD-encrypt `plaintext` under `key`, binding `aad`
    ///
    /// A fresh random nonce is generated per call; nonces are never
    /// reused for the same key.
    fn seal(&self, key: &SymmetricKey, plaintext: &[u8], aad: &[u8])
        -> Result<SealedBox, CryptoError>;

    /// AEAD-decrypt and verify; fails on any tag or AAD mismatch
    fn open(&self, key: &SymmetricKey, sealed: &SealedBox, aad: &[u8])
        -> Result<Vec<u8>, CryptoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_roundtrip() {
        let pk = PublicKey([7u8; KEY_SIZE]);
        let parsed = PublicKey::from_slice(pk.as_bytes()).unwrap();
        assert_eq!(pk, parsed);
    }

    #[test]
    fn test_public_key_rejects_bad_length() {
        assert!(PublicKey::from_slice(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_symmetric_key_debug_redacted() {
        let key = SymmetricKey::new([0xAB; KEY_SIZE]);
        let debug = format!("{:?}", key);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("ab"));
    }

    #[test]
    fn test_keypair_debug_redacts_secret() {
        let kp = EcdhKeypair::new(PublicKey([1u8; KEY_SIZE]), [2u8; KEY_SIZE]);
        let debug = format!("{:?}", kp);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode([2u8; KEY_SIZE])));
    }
}
