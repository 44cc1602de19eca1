//! Error types for group key operations

use crate::core_keys::UserId;
use thiserror::Error;

/// Errors that can occur in group key management
#[derive(Debug, Error)]
pub enum GroupKeyError {
    /// No group key has been established yet
    #[error("No current group key")]
    NoCurrentKey,

    /// Wrapping the group key for one member failed
    #[error("Failed to wrap group key for {user_id}: {reason}")]
    Wrap { user_id: UserId, reason: String },

    /// Unwrapping an inbound envelope failed
    #[error("Failed to unwrap key envelope: {0}")]
    Unwrap(String),

    /// The envelope's sender has no resolvable public key
    #[error("Unknown envelope sender: {0}")]
    UnknownSender(UserId),

    /// The envelope was addressed to someone else
    #[error("Envelope addressed to {recipient}, not the local user")]
    WrongRecipient { recipient: UserId },

    /// Key management layer failure
    #[error("Key error: {0}")]
    Key(#[from] crate::core_keys::KeyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GroupKeyError::Wrap {
            user_id: UserId::from("bob"),
            reason: "no public key".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to wrap group key for bob: no public key");
    }
}
