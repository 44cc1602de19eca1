//! Encrypted chat session state machine
//!
//! Ties the key service, group key manager and message cipher together
//! for one meeting. All mutation goes through `&mut self`; concurrent
//! callers are serialized by [`SessionHandle`](super::SessionHandle).

use super::errors::SessionError;
use super::events::{ChatEvent, EventBroadcaster};
use super::state::SessionState;
use super::transport::{ChatTransport, Frame, TransportError};
use crate::config::{SendPolicy, SessionConfig};
use crate::core_cipher::MessageCipher;
use crate::core_group::{GroupKeyError, GroupKeyManager, KeyEnvelope, MeetingId, GroupMember, Roster};
use crate::core_keys::{now_millis, KeyError, KeyManagementService, UserId};
use crate::metrics::{record_counter, Timer};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on stashed envelopes awaiting sender key resolution
const MAX_PENDING_ENVELOPES: usize = 32;

/// One participant's encrypted session for one meeting
pub struct EncryptedChatSession {
    meeting_id: MeetingId,
    keys: KeyManagementService,
    group: GroupKeyManager,
    cipher: MessageCipher,
    /// The user this session was started as; kept here so a retry can
    /// re-run key initialization even when the first attempt failed
    /// before the key service learned it
    local_user: Option<UserId>,
    roster: Roster,
    transport: Arc<dyn ChatTransport>,
    events: EventBroadcaster,
    state: SessionState,
    config: SessionConfig,
    /// Plaintexts queued while not ready, flushed in FIFO order
    outbox: VecDeque<Vec<u8>>,
    /// Inbound envelopes whose sender key could not yet be resolved
    pending_envelopes: Vec<KeyEnvelope>,
    rotation_failures: u32,
}

impl EncryptedChatSession {
    pub fn new(
        meeting_id: MeetingId,
        keys: KeyManagementService,
        transport: Arc<dyn ChatTransport>,
        config: SessionConfig,
    ) -> Self {
        let provider = keys.provider();
        let group =
            GroupKeyManager::new(meeting_id.clone(), Arc::clone(&provider), config.epoch_cache_size);
        let cipher = MessageCipher::new(provider);
        let events = EventBroadcaster::new(config.event_capacity);

        Self {
            meeting_id,
            keys,
            group,
            cipher,
            local_user: None,
            roster: Roster::new(),
            transport,
            events,
            state: SessionState::Idle,
            config,
            outbox: VecDeque::new(),
            pending_envelopes: Vec::new(),
            rotation_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn current_epoch(&self) -> Option<u64> {
        self.group.current_epoch()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Start the session as `user_id`
    ///
    /// With `initial_members`, this participant creates the group: it
    /// establishes epoch 1 and distributes envelopes. Without, it joins
    /// and stays initializing until the first envelope arrives.
    pub async fn start(
        &mut self,
        user_id: UserId,
        initial_members: Option<Vec<UserId>>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::NotReady(self.state));
        }
        self.set_state(SessionState::Initializing);

        self.local_user = Some(user_id.clone());
        if let Err(e) = self.keys.initialize(user_id).await {
            let e = SessionError::from(e);
            self.set_state(SessionState::Error);
            self.events.emit(ChatEvent::SessionFailed { reason: e.to_string() });
            return Err(e);
        }
        self.roster.upsert(GroupMember {
            user_id: self.keys.user_id()?.clone(),
            public_key: self.keys.public_key()?,
            joined_at: now_millis(),
        });

        match initial_members {
            Some(member_ids) => {
                info!(meeting = %self.meeting_id, members = member_ids.len(), "Creating encrypted session");
                self.rebuild_roster(&member_ids).await?;
                match self.rotate_and_publish().await {
                    Ok(()) => {
                        self.set_state(SessionState::Ready);
                        self.flush_outbox().await?;
                        Ok(())
                    }
                    Err(e) => {
                        self.set_state(SessionState::Error);
                        self.events.emit(ChatEvent::SessionFailed { reason: e.to_string() });
                        Err(e)
                    }
                }
            }
            None => {
                info!(meeting = %self.meeting_id, "Joining encrypted session, awaiting group key");
                Ok(())
            }
        }
    }

    /// Encrypt and broadcast `plaintext`
    ///
    /// When not ready the behavior follows the configured
    /// [`SendPolicy`]: either the message is queued for the next ready
    /// window or the call fails.
    pub async fn send_message(&mut self, plaintext: &[u8]) -> Result<Option<Uuid>, SessionError> {
        if self.state.can_send() {
            let id = self.encrypt_and_broadcast(plaintext).await?;
            return Ok(Some(id));
        }

        match self.config.send_policy {
            SendPolicy::Buffer => {
                if self.outbox.len() >= self.config.max_outbox {
                    return Err(SessionError::OutboxFull);
                }
                debug!(meeting = %self.meeting_id, state = %self.state, "Buffering send until ready");
                self.outbox.push_back(plaintext.to_vec());
                record_counter("chat.messages.buffered", 1);
                Ok(None)
            }
            SendPolicy::Reject => Err(SessionError::NotReady(self.state)),
        }
    }

    /// Apply a roster change, rotating the group key when membership
    /// actually differs
    pub async fn apply_roster(&mut self, member_ids: &[UserId]) -> Result<(), SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady(self.state));
        }
        if !self.roster.differs_from(member_ids) {
            debug!(meeting = %self.meeting_id, "Roster unchanged, skipping rotation");
            return Ok(());
        }

        self.set_state(SessionState::Rotating);
        let old_epoch = self.group.current_epoch();

        let result = match self.rebuild_roster(member_ids).await {
            Ok(()) => self.rotate_and_publish().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.rotation_failures = 0;
                self.set_state(SessionState::Ready);
                debug!(
                    meeting = %self.meeting_id,
                    old = ?old_epoch,
                    new = ?self.group.current_epoch(),
                    "Roster change applied"
                );
                Ok(())
            }
            Err(e) => self.handle_rotation_failure(e),
        }
    }

    /// Process one inbound frame
    ///
    /// Decryption failures degrade to a per-message event; the session
    /// never aborts on bad inbound traffic.
    pub async fn handle_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame {
            Frame::Envelope(envelope) => self.handle_envelope(envelope).await,
            Frame::Message(message) => {
                match self.cipher.decrypt(self.group.cache(), &message) {
                    Ok(plaintext) => {
                        record_counter("chat.messages.decrypted", 1);
                        self.events.emit(ChatEvent::MessageDecrypted {
                            message_id: message.id,
                            sender_id: message.sender_id,
                            plaintext,
                            timestamp: message.timestamp,
                        });
                    }
                    Err(e) => {
                        record_counter("chat.messages.undecryptable", 1);
                        warn!(
                            meeting = %self.meeting_id,
                            message_id = %message.id,
                            epoch = message.epoch,
                            error = %e,
                            "Inbound message undecryptable"
                        );
                        self.events.emit(ChatEvent::MessageUndecryptable {
                            message_id: message.id,
                            sender_id: message.sender_id,
                            epoch: message.epoch,
                            reason: e.to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Recover from the error state: reset key state and re-establish
    /// a fresh epoch
    pub async fn retry_encryption(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Error {
            return Err(SessionError::NotReady(self.state));
        }
        info!(meeting = %self.meeting_id, "Retrying encryption setup");

        let user_id = self.local_user.clone().ok_or(KeyError::NotInitialized)?;
        self.rotation_failures = 0;
        self.group.reset();
        self.pending_envelopes.clear();
        self.set_state(SessionState::Initializing);

        if let Err(e) = self.keys.initialize(user_id).await {
            let e = SessionError::from(e);
            self.set_state(SessionState::Error);
            self.events.emit(ChatEvent::SessionFailed { reason: e.to_string() });
            return Err(e);
        }
        self.roster.upsert(GroupMember {
            user_id: self.keys.user_id()?.clone(),
            public_key: self.keys.public_key()?,
            joined_at: now_millis(),
        });

        match self.rotate_and_publish().await {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                self.flush_outbox().await?;
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Error);
                self.events.emit(ChatEvent::SessionFailed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    /// Drop key material and leave the meeting
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.group.reset();
        self.outbox.clear();
        self.pending_envelopes.clear();
        self.keys.clear()?;
        info!(meeting = %self.meeting_id, "Session closed");
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: KeyEnvelope) -> Result<(), SessionError> {
        let local_user = self.keys.user_id()?.clone();
        if envelope.recipient_id != local_user {
            debug!(
                meeting = %self.meeting_id,
                recipient = %envelope.recipient_id,
                "Ignoring envelope for another recipient"
            );
            return Ok(());
        }

        let Some(sender_key) = self.resolve_sender_key(&envelope.sender_id).await else {
            if self.pending_envelopes.len() >= MAX_PENDING_ENVELOPES {
                return Err(GroupKeyError::UnknownSender(envelope.sender_id).into());
            }
            warn!(
                meeting = %self.meeting_id,
                sender = %envelope.sender_id,
                "Sender key unresolved, stashing envelope"
            );
            self.pending_envelopes.push(envelope);
            return Ok(());
        };

        match self.group.install_envelope(&self.keys, &sender_key, &envelope) {
            Ok(epoch) => {
                record_counter("chat.envelopes.installed", 1);
                if self.state == SessionState::Initializing {
                    self.set_state(SessionState::Ready);
                    self.events.emit(ChatEvent::EpochRotated {
                        old_epoch: None,
                        new_epoch: epoch,
                        skipped: vec![],
                    });
                    self.flush_outbox().await?;
                }
                self.retry_pending_envelopes().await;
                Ok(())
            }
            Err(e) => {
                warn!(meeting = %self.meeting_id, error = %e, "Envelope rejected");
                Ok(())
            }
        }
    }

    /// Sender keys come from the roster when known, else the directory
    async fn resolve_sender_key(
        &mut self,
        sender_id: &UserId,
    ) -> Option<crate::core_crypto::PublicKey> {
        if let Some(member) = self.roster.get(sender_id) {
            return Some(member.public_key);
        }
        let records = self.keys.fetch_public_keys(std::slice::from_ref(sender_id)).await;
        let record = records.into_iter().next()?;
        let public_key = record.public_key;
        self.roster.upsert(GroupMember {
            user_id: record.user_id,
            public_key,
            joined_at: now_millis(),
        });
        Some(public_key)
    }

    async fn retry_pending_envelopes(&mut self) {
        if self.pending_envelopes.is_empty() {
            return;
        }
        let stashed = std::mem::take(&mut self.pending_envelopes);
        for envelope in stashed {
            match self.resolve_sender_key(&envelope.sender_id).await {
                Some(sender_key) => {
                    if let Err(e) = self.group.install_envelope(&self.keys, &sender_key, &envelope)
                    {
                        warn!(meeting = %self.meeting_id, error = %e, "Stashed envelope rejected");
                    }
                }
                None => self.pending_envelopes.push(envelope),
            }
        }
    }

    /// Rebuild the roster from `member_ids`, resolving public keys
    /// through the directory
    ///
    /// Members without a published key are excluded and reported via a
    /// [`ChatEvent::RotationWarning`].
    async fn rebuild_roster(&mut self, member_ids: &[UserId]) -> Result<(), SessionError> {
        let local_user = self.keys.user_id()?.clone();
        let remote_ids: Vec<UserId> =
            member_ids.iter().filter(|id| **id != local_user).cloned().collect();

        let records = self.keys.fetch_public_keys(&remote_ids).await;
        if records.len() < remote_ids.len() {
            let resolved: Vec<&UserId> = records.iter().map(|r| &r.user_id).collect();
            let missing: Vec<String> = remote_ids
                .iter()
                .filter(|id| !resolved.contains(id))
                .map(|id| id.to_string())
                .collect();
            self.events.emit(ChatEvent::RotationWarning {
                message: format!("No published key for: {}", missing.join(", ")),
            });
        }

        let mut roster = Roster::new();
        roster.upsert(GroupMember {
            user_id: local_user,
            public_key: self.keys.public_key()?,
            joined_at: now_millis(),
        });
        for record in records {
            roster.upsert(GroupMember {
                user_id: record.user_id,
                public_key: record.public_key,
                joined_at: now_millis(),
            });
        }
        self.roster = roster;
        Ok(())
    }

    /// Rotate to the next epoch and publish its envelopes
    ///
    /// The new epoch is installed locally before publishing; a publish
    /// timeout leaves it valid and counts as a rotation failure.
    async fn rotate_and_publish(&mut self) -> Result<(), SessionError> {
        let timer = Timer::new("chat.rotation.duration_ms");
        let old_epoch = self.group.current_epoch();

        let outcome = self.group.rotate(&self.keys, &self.roster)?;
        record_counter("chat.rotations.total", 1);

        let publish = async {
            for envelope in &outcome.envelopes {
                self.transport
                    .send_to(&envelope.recipient_id, Frame::Envelope(envelope.clone()))
                    .await?;
            }
            Ok::<(), TransportError>(())
        };
        match timeout(self.config.rotation_timeout, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(SessionError::RotationTimeout),
        }

        timer.stop();
        if outcome.is_partial() {
            self.events.emit(ChatEvent::RotationWarning {
                message: format!(
                    "Epoch {} excludes {} member(s)",
                    outcome.epoch,
                    outcome.skipped.len()
                ),
            });
        }
        self.events.emit(ChatEvent::EpochRotated {
            old_epoch,
            new_epoch: outcome.epoch,
            skipped: outcome.skipped,
        });
        Ok(())
    }

    async fn encrypt_and_broadcast(&mut self, plaintext: &[u8]) -> Result<Uuid, SessionError> {
        let group_key = self
            .group
            .current()
            .ok_or(SessionError::Group(GroupKeyError::NoCurrentKey))?;
        let sender_id = self.keys.user_id()?;
        let message = self.cipher.encrypt(group_key, sender_id, plaintext)?;
        let id = message.id;

        self.transport.broadcast(Frame::Message(message)).await?;
        record_counter("chat.messages.encrypted", 1);
        Ok(id)
    }

    async fn flush_outbox(&mut self) -> Result<(), SessionError> {
        while let Some(plaintext) = self.outbox.pop_front() {
            if let Err(e) = self.encrypt_and_broadcast(&plaintext).await {
                // Keep the message for the next ready window.
                self.outbox.push_front(plaintext);
                return Err(e);
            }
        }
        Ok(())
    }

    fn handle_rotation_failure(&mut self, error: SessionError) -> Result<(), SessionError> {
        self.rotation_failures += 1;
        record_counter("chat.rotations.failed", 1);
        warn!(
            meeting = %self.meeting_id,
            failures = self.rotation_failures,
            error = %error,
            "Key rotation failed"
        );

        if self.rotation_failures >= self.config.max_rotation_failures
            || self.group.current().is_none()
        {
            self.set_state(SessionState::Error);
            self.events.emit(ChatEvent::SessionFailed { reason: error.to_string() });
        } else {
            // The previous (or freshly installed) epoch is still valid.
            self.set_state(SessionState::Ready);
            self.events.emit(ChatEvent::RotationWarning { message: error.to_string() });
        }
        Err(error)
    }

    fn set_state(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal session state transition {} -> {}",
            self.state,
            to
        );
        debug!(meeting = %self.meeting_id, from = %self.state, to = %to, "Session state change");
        let from = self.state;
        self.state = to;
        self.events.emit(ChatEvent::StateChanged { from, to });
    }
}
