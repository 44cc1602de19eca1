//! Group key management
//!
//! Maintains the shared symmetric group key for a meeting: epoch-
//! versioned generation, per-member envelope wrapping over ECDH pair
//! keys, rotation on every roster change, and a bounded cache of
//! superseded epochs so that messages encrypted just before a rotation
//! remain decryptable when they arrive late.
//!
//! # Security invariants
//!
//! - Epoch monotonicity: every rotation strictly increments the epoch
//! - A member absent from the roster at rotation time receives no
//!   envelope for the new epoch and cannot derive its key
//! - A new epoch becomes current only after all envelopes are
//!   constructed; no partial-epoch state is observable
//! - Superseded keys are evicted beyond the cache bound

mod envelope;
mod errors;
mod group_key;
mod manager;
mod types;

pub use envelope::KeyEnvelope;
pub use errors::GroupKeyError;
pub use group_key::{EpochKeyCache, GroupKey};
pub use manager::{GroupKeyManager, RotationOutcome};
pub use types::{GroupMember, MeetingId, Roster};
