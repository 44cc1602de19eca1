//! Session event broadcasting
//!
//! Sessions emit events over a tokio broadcast channel so UI layers and
//! other subsystems can react to state changes, decrypted messages and
//! rotation outcomes without holding the session lock.

use super::state::SessionState;
use crate::core_keys::UserId;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by an encrypted chat session
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The session moved between lifecycle states
    StateChanged { from: SessionState, to: SessionState },

    /// An inbound message decrypted successfully
    MessageDecrypted {
        message_id: Uuid,
        sender_id: UserId,
        plaintext: Vec<u8>,
        timestamp: u64,
    },

    /// An inbound message could not be decrypted; the session keeps
    /// running and surfaces the failure per message
    MessageUndecryptable {
        message_id: Uuid,
        sender_id: UserId,
        epoch: u64,
        reason: String,
    },

    /// A key rotation completed and a new epoch is current
    EpochRotated {
        old_epoch: Option<u64>,
        new_epoch: u64,
        /// Members excluded from the new epoch
        skipped: Vec<UserId>,
    },

    /// A rotation degraded (excluded members, publish timeout) but the
    /// session is still usable
    RotationWarning { message: String },

    /// The session entered the error state
    SessionFailed { reason: String },
}

/// Broadcasts [`ChatEvent`]s to any number of subscribers
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBroadcaster {
    /// `capacity` bounds the number of buffered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event; returns the number of subscribers that saw it
    pub fn emit(&self, event: ChatEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
