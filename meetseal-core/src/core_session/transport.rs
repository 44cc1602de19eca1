//! Frame codec and the transport seam
//!
//! Sessions hand key envelopes and encrypted messages to a
//! [`ChatTransport`]; frames are bincode-encoded on the wire. The
//! in-process [`LoopbackHub`] implementation backs tests and the demo
//! binary.

use crate::core_cipher::EncryptedMessage;
use crate::core_group::KeyEnvelope;
use crate::core_keys::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Frame encoding failed: {0}")]
    Encoding(String),

    #[error("Frame decoding failed: {0}")]
    Decoding(String),

    #[error("No route to {0}")]
    UnknownDestination(UserId),
}

/// A unit of traffic between session participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// A wrapped group key addressed to one member
    Envelope(KeyEnvelope),
    /// An encrypted chat message for the whole group
    Message(EncryptedMessage),
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        bincode::serialize(self).map_err(|e| TransportError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        bincode::deserialize(bytes).map_err(|e| TransportError::Decoding(e.to_string()))
    }
}

/// Transport seam between a session and the outside world
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a frame to one participant
    async fn send_to(&self, recipient: &UserId, frame: Frame) -> Result<(), TransportError>;

    /// Deliver a frame to every other participant
    async fn broadcast(&self, frame: Frame) -> Result<(), TransportError>;
}

/// In-process message hub for tests and the demo binary
///
/// Each registered participant gets an mpsc receiver; frames pass
/// through the bincode codec on the way so the wire encoding is
/// exercised end to end.
#[derive(Default)]
pub struct LoopbackHub {
    peers: RwLock<HashMap<UserId, mpsc::UnboundedSender<Frame>>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a participant; returns their inbound frame stream
    pub async fn register(
        self: &Arc<Self>,
        user_id: UserId,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(user_id.clone(), tx);
        (LoopbackTransport { hub: Arc::clone(self), local: user_id }, rx)
    }

    pub async fn unregister(&self, user_id: &UserId) {
        self.peers.write().await.remove(user_id);
    }

    async fn deliver(&self, recipient: &UserId, frame: Frame) -> Result<(), TransportError> {
        // Round-trip through the codec so the wire format is real.
        let bytes = frame.to_bytes()?;
        let frame = Frame::from_bytes(&bytes)?;

        let peers = self.peers.read().await;
        let tx = peers
            .get(recipient)
            .ok_or_else(|| TransportError::UnknownDestination(recipient.clone()))?;
        tx.send(frame)
            .map_err(|_| TransportError::Unavailable(format!("{} disconnected", recipient)))
    }
}

/// One participant's view of a [`LoopbackHub`]
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    local: UserId,
}

#[async_trait]
impl ChatTransport for LoopbackTransport {
    async fn send_to(&self, recipient: &UserId, frame: Frame) -> Result<(), TransportError> {
        self.hub.deliver(recipient, frame).await
    }

    async fn broadcast(&self, frame: Frame) -> Result<(), TransportError> {
        let recipients: Vec<UserId> = {
            let peers = self.hub.peers.read().await;
            peers.keys().filter(|id| **id != self.local).cloned().collect()
        };
        for recipient in recipients {
            if let Err(e) = self.hub.deliver(&recipient, frame.clone()).await {
                debug!(recipient = %recipient, error = %e, "Loopback delivery failed");
            }
        }
        Ok(())
    }
}
