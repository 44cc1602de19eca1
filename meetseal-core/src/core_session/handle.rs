//! Session command actor
//!
//! Sessions are single-owner state machines; the handle serializes
//! concurrent callers through an mpsc command queue. Bursts of roster
//! changes are coalesced so membership churn costs one rotation instead
//! of one per change.

use super::events::{ChatEvent, EventBroadcaster};
use super::session::EncryptedChatSession;
use super::transport::Frame;
use super::SessionError;
use crate::core_group::MeetingId;
use crate::core_keys::UserId;
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Commands accepted by a running session task
#[derive(Debug)]
pub enum SessionCommand {
    /// Encrypt and broadcast a message
    Send(Vec<u8>),
    /// Membership changed; rotate if it actually differs
    RosterChanged(Vec<UserId>),
    /// An inbound frame arrived from the transport
    Inbound(Frame),
    /// Recover from the error state
    Retry,
    /// Tear the session down
    Close,
}

/// Cloneable handle to a spawned session task
#[derive(Clone)]
pub struct SessionHandle {
    meeting_id: MeetingId,
    tx: mpsc::Sender<SessionCommand>,
    events: EventBroadcaster,
}

impl SessionHandle {
    /// Move `session` onto its own task and return a handle to it
    pub fn spawn(session: EncryptedChatSession, queue_depth: usize) -> Self {
        let meeting_id = session.meeting_id().clone();
        let events = session.events().clone();
        let (tx, rx) = mpsc::channel(queue_depth);

        tokio::spawn(run_session(session, rx));

        Self { meeting_id, tx, events }
    }

    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn send_message(&self, plaintext: Vec<u8>) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Send(plaintext)).await
    }

    pub async fn roster_changed(&self, member_ids: Vec<UserId>) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::RosterChanged(member_ids)).await
    }

    pub async fn inbound(&self, frame: Frame) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Inbound(frame)).await
    }

    pub async fn retry(&self) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Retry).await
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Close).await
    }

    async fn dispatch(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

async fn run_session(mut session: EncryptedChatSession, mut rx: mpsc::Receiver<SessionCommand>) {
    let mut deferred: VecDeque<SessionCommand> = VecDeque::new();

    loop {
        let command = match deferred.pop_front() {
            Some(c) => c,
            None => match rx.recv().await {
                Some(c) => c,
                None => break,
            },
        };

        let command = match command {
            SessionCommand::RosterChanged(ids) => {
                SessionCommand::RosterChanged(coalesce_roster_changes(ids, &mut rx, &mut deferred))
            }
            other => other,
        };

        match command {
            SessionCommand::Send(plaintext) => {
                if let Err(e) = session.send_message(&plaintext).await {
                    warn!(meeting = %session.meeting_id(), error = %e, "Send failed");
                }
            }
            SessionCommand::RosterChanged(member_ids) => {
                if let Err(e) = session.apply_roster(&member_ids).await {
                    warn!(meeting = %session.meeting_id(), error = %e, "Roster change failed");
                }
            }
            SessionCommand::Inbound(frame) => {
                if let Err(e) = session.handle_frame(frame).await {
                    warn!(meeting = %session.meeting_id(), error = %e, "Inbound frame failed");
                }
            }
            SessionCommand::Retry => {
                if let Err(e) = session.retry_encryption().await {
                    warn!(meeting = %session.meeting_id(), error = %e, "Retry failed");
                }
            }
            SessionCommand::Close => {
                if let Err(e) = session.close() {
                    warn!(meeting = %session.meeting_id(), error = %e, "Close failed");
                }
                break;
            }
        }
    }

    debug!(meeting = %session.meeting_id(), "Session task exited");
}

/// Drain queued commands, keeping only the newest roster change
///
/// Non-roster commands encountered while draining keep their relative
/// order and run after the coalesced rotation.
fn coalesce_roster_changes(
    latest: Vec<UserId>,
    rx: &mut mpsc::Receiver<SessionCommand>,
    deferred: &mut VecDeque<SessionCommand>,
) -> Vec<UserId> {
    let mut latest = latest;
    while let Ok(next) = rx.try_recv() {
        match next {
            SessionCommand::RosterChanged(ids) => latest = ids,
            other => deferred.push_back(other),
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_coalesce_keeps_newest_roster() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(SessionCommand::RosterChanged(vec![UserId::from("a"), UserId::from("b")]))
            .await
            .unwrap();
        tx.send(SessionCommand::RosterChanged(vec![UserId::from("a")])).await.unwrap();

        let mut deferred = VecDeque::new();
        let latest =
            coalesce_roster_changes(vec![UserId::from("a")], &mut rx, &mut deferred);
        assert_eq!(latest, vec![UserId::from("a")]);
        assert!(deferred.is_empty());
    }

    #[tokio::test]
    async fn test_coalesce_defers_other_commands_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(SessionCommand::Send(b"first".to_vec())).await.unwrap();
        tx.send(SessionCommand::RosterChanged(vec![UserId::from("x")])).await.unwrap();
        tx.send(SessionCommand::Send(b"second".to_vec())).await.unwrap();

        let mut deferred = VecDeque::new();
        let latest = coalesce_roster_changes(vec![], &mut rx, &mut deferred);
        assert_eq!(latest, vec![UserId::from("x")]);

        assert_eq!(deferred.len(), 2);
        assert!(matches!(deferred.pop_front(), Some(SessionCommand::Send(p)) if p == b"first"));
        assert!(matches!(deferred.pop_front(), Some(SessionCommand::Send(p)) if p == b"second"));
    }

    #[tokio::test]
    async fn test_coalesce_with_empty_queue() {
        let (_tx, mut rx) = mpsc::channel::<SessionCommand>(16);
        let mut deferred = VecDeque::new();
        let latest = coalesce_roster_changes(vec![UserId::from("only")], &mut rx, &mut deferred);
        assert_eq!(latest, vec![UserId::from("only")]);
    }
}
