//! Per-user asymmetric key management
//!
//! Owns the local user's X25519 key pair: generation, loading from the
//! process-scoped keystore, publishing the public half to the key
//! directory, and the (only) pair-key derivation door to the private
//! key. The private key never leaves [`KeyManagementService`].

mod directory;
mod errors;
mod keystore;
mod service;
mod user_id;

pub use directory::{DirectoryError, KeyDirectory, MemoryDirectory, UserPublicKey};
pub use errors::KeyError;
pub use keystore::{KeystoreError, MemoryKeystore, SecretKeystore};
pub use service::KeyManagementService;
pub(crate) use service::now_millis;
pub use user_id::UserId;
