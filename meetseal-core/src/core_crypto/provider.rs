//! Default crypto backend on x25519-dalek + HKDF-SHA256 + AES-256-GCM

use super::{
    CryptoError, CryptoProvider, EcdhKeypair, PublicKey, SealedBox, SymmetricKey, KEY_SIZE,
    NONCE_SIZE,
};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, TryRngCore};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Domain-separation label prepended to every HKDF info
const HKDF_LABEL: &[u8] = b"meetseal v1 ";

/// [`CryptoProvider`] backed by the dalek/RustCrypto stack
#[derive(Debug, Clone, Default)]
pub struct DalekCryptoProvider;

impl DalekCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for DalekCryptoProvider {
    fn generate_keypair(&self) -> Result<EcdhKeypair, CryptoError> {
        let mut secret_bytes = [0u8; KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut secret_bytes)
            .map_err(|e| CryptoError::KeyGeneration(format!("OS RNG unavailable: {}", e)))?;

        let secret = StaticSecret::from(secret_bytes);
        let public = X25519PublicKey::from(&secret);

        Ok(EcdhKeypair::new(PublicKey(public.to_bytes()), secret.to_bytes()))
    }

    fn derive_pair_key(
        &self,
        keypair: &EcdhKeypair,
        peer: &PublicKey,
        info: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        let secret = StaticSecret::from(*keypair.secret_bytes());
        let peer_pk = X25519PublicKey::from(*peer.as_bytes());

        let shared = secret.diffie_hellman(&peer_pk);

        // Contributory behavior check: reject the all-zero shared
        // secret produced by low-order peer points.
        if shared.as_bytes().iter().all(|&b| b == 0) {
            return Err(CryptoError::Derivation("Degenerate shared secret".to_string()));
        }

        let hk = hkdf::Hkdf::<sha2::Sha256>::new(None, shared.as_bytes());
        let mut labeled = Vec::with_capacity(HKDF_LABEL.len() + info.len());
        labeled.extend_from_slice(HKDF_LABEL);
        labeled.extend_from_slice(info);

        let mut key = [0u8; KEY_SIZE];
        hk.expand(&labeled, &mut key)
            .map_err(|e| CryptoError::Derivation(format!("HKDF expand failed: {}", e)))?;

        Ok(SymmetricKey::new(key))
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<SealedBox, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| CryptoError::Encryption(format!("OS RNG unavailable: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let ciphertext = cipher
            .encrypt(nonce, aes_gcm::aead::Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::Encryption(format!("AEAD encryption failed: {}", e)))?;

        Ok(SealedBox { nonce: nonce_bytes.to_vec(), ciphertext })
    }

    fn open(
        &self,
        key: &SymmetricKey,
        sealed: &SealedBox,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidInput("Invalid nonce size".to_string()));
        }
        let nonce = Nonce::from_slice(&sealed.nonce);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        cipher
            .decrypt(nonce, aes_gcm::aead::Payload { msg: &sealed.ciphertext, aad })
            .map_err(|e| CryptoError::Decryption(format!("AEAD decryption failed: {}", e)))
    }
}
