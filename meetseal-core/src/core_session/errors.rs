//! Session error types

use super::state::SessionState;
use super::transport::TransportError;
use crate::core_cipher::CipherError;
use crate::core_group::GroupKeyError;
use crate::core_keys::KeyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Key management error: {0}")]
    Key(#[from] KeyError),

    #[error("Group key error: {0}")]
    Group(#[from] GroupKeyError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session not ready (state: {0})")]
    NotReady(SessionState),

    #[error("Key rotation timed out")]
    RotationTimeout,

    #[error("Outbox is full, message dropped")]
    OutboxFull,

    #[error("Session is closed")]
    Closed,
}
