//! Session registry
//!
//! Tracks all running sessions by meeting id, wires them into the
//! shutdown coordinator and reports component health.

use super::handle::SessionHandle;
use super::session::EncryptedChatSession;
use super::SessionError;
use crate::config::SessionConfig;
use crate::core_group::MeetingId;
use crate::health::ComponentHealth;
use crate::metrics::record_gauge;
use crate::shutdown::ShutdownCoordinator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Owns all encrypted chat sessions in the process
pub struct ChatSessionService {
    sessions: Arc<RwLock<HashMap<MeetingId, SessionHandle>>>,
    shutdown: Arc<ShutdownCoordinator>,
    config: SessionConfig,
}

impl ChatSessionService {
    pub fn new(config: SessionConfig, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), shutdown, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn `session` on its own task and register it
    ///
    /// Replaces any existing session for the same meeting; the old task
    /// is told to close.
    pub async fn open(&self, session: EncryptedChatSession) -> Result<SessionHandle, SessionError> {
        if self.shutdown.is_shutting_down().await {
            return Err(SessionError::Closed);
        }

        let meeting_id = session.meeting_id().clone();
        let handle = SessionHandle::spawn(session, self.config.command_queue_depth);

        let previous = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(meeting_id.clone(), handle.clone());
            record_gauge("chat.sessions.active", sessions.len() as f64);
            previous
        };
        if let Some(old) = previous {
            info!(meeting = %meeting_id, "Replacing existing session");
            let _ = old.close().await;
        }

        Ok(handle)
    }

    pub async fn get(&self, meeting_id: &MeetingId) -> Option<SessionHandle> {
        self.sessions.read().await.get(meeting_id).cloned()
    }

    /// Close and deregister the session for `meeting_id`
    pub async fn close(&self, meeting_id: &MeetingId) -> Result<(), SessionError> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            let handle = sessions.remove(meeting_id);
            record_gauge("chat.sessions.active", sessions.len() as f64);
            handle
        };
        match handle {
            Some(handle) => handle.close().await,
            None => Ok(()),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn health_check(&self) -> ComponentHealth {
        if self.shutdown.is_shutting_down().await {
            return ComponentHealth::degraded("chat_sessions", "Shutting down");
        }
        let count = self.sessions.read().await.len();
        ComponentHealth::healthy("chat_sessions")
            .with_message(format!("{} active session(s)", count))
    }

    /// Close every session (graceful shutdown path)
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            record_gauge("chat.sessions.active", 0.0);
            sessions.drain().map(|(_, h)| h).collect()
        };
        info!(sessions = handles.len(), "Closing all chat sessions");
        for handle in handles {
            let _ = handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::DalekCryptoProvider;
    use crate::core_keys::{KeyManagementService, MemoryDirectory, MemoryKeystore, UserId};
    use crate::core_session::transport::LoopbackHub;
    use crate::health::HealthStatus;
    use std::time::Duration;

    async fn session(meeting: &MeetingId, user: &str) -> EncryptedChatSession {
        let hub = LoopbackHub::new();
        let (transport, _rx) = hub.register(UserId::from(user)).await;
        let keys = KeyManagementService::new(
            Arc::new(MemoryKeystore::new()),
            Arc::new(MemoryDirectory::new()),
            Arc::new(DalekCryptoProvider::new()),
        );
        EncryptedChatSession::new(
            meeting.clone(),
            keys,
            Arc::new(transport),
            SessionConfig::default(),
        )
    }

    fn service() -> ChatSessionService {
        ChatSessionService::new(
            SessionConfig::default(),
            Arc::new(ShutdownCoordinator::new(Duration::from_millis(50))),
        )
    }

    #[tokio::test]
    async fn test_open_and_get() {
        let svc = service();
        let meeting = MeetingId::random();

        svc.open(session(&meeting, "alice").await).await.unwrap();
        assert!(svc.get(&meeting).await.is_some());
        assert_eq!(svc.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_removes_session() {
        let svc = service();
        let meeting = MeetingId::random();

        svc.open(session(&meeting, "alice").await).await.unwrap();
        svc.close(&meeting).await.unwrap();
        assert!(svc.get(&meeting).await.is_none());
    }

    #[tokio::test]
    async fn test_close_unknown_meeting_is_noop() {
        let svc = service();
        assert!(svc.close(&MeetingId::random()).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_rejected_during_shutdown() {
        let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_millis(10)));
        let svc = ChatSessionService::new(SessionConfig::default(), Arc::clone(&shutdown));
        let meeting = MeetingId::random();

        shutdown.shutdown_immediately().await;
        let result = svc.open(session(&meeting, "alice").await).await;
        assert!(matches!(result, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn test_health_reflects_shutdown() {
        let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_millis(10)));
        let svc = ChatSessionService::new(SessionConfig::default(), Arc::clone(&shutdown));

        assert_eq!(svc.health_check().await.status, HealthStatus::Healthy);
        shutdown.shutdown_immediately().await;
        assert_eq!(svc.health_check().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_sessions() {
        let svc = service();
        let m1 = MeetingId::random();
        let m2 = MeetingId::random();
        svc.open(session(&m1, "alice").await).await.unwrap();
        svc.open(session(&m2, "bob").await).await.unwrap();

        svc.shutdown().await;
        assert_eq!(svc.session_count().await, 0);
    }
}
