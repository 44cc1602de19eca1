//! Encrypted chat session orchestration
//!
//! A session ties together the local key service, the group key
//! manager and the message cipher for one meeting, and drives them
//! through a small lifecycle state machine. Each session runs on its
//! own task behind a [`SessionHandle`]; [`ChatSessionService`] tracks
//! all sessions in the process.

mod errors;
mod events;
mod handle;
mod service;
mod session;
mod state;
pub mod transport;

pub use errors::SessionError;
pub use events::{ChatEvent, EventBroadcaster};
pub use handle::{SessionCommand, SessionHandle};
pub use service::ChatSessionService;
pub use session::EncryptedChatSession;
pub use state::SessionState;
pub use transport::{ChatTransport, Frame, LoopbackHub, LoopbackTransport, TransportError};
