//! Session lifecycle state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an encrypted chat session
///
/// ```text
/// Idle -> Initializing -> Ready <-> Rotating
///              |                       |
///              +--------> Error <------+
///                           |
///                           +--> Initializing (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Keys being set up or first group key awaited
    Initializing,
    /// Holding a current group key; sends permitted
    Ready,
    /// A key rotation is in flight
    Rotating,
    /// Too many consecutive rotation failures; explicit retry required
    Error,
}

impl SessionState {
    /// Whether outbound sends are permitted in this state
    pub fn can_send(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Ready)
                | (Initializing, Error)
                | (Ready, Rotating)
                | (Rotating, Ready)
                | (Rotating, Error)
                | (Error, Initializing)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Rotating => "rotating",
            SessionState::Error => "error",
        };
        write!(f, "{}", s)
    }
}
