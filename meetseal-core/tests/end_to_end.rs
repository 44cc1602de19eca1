/*
    End-to-End Integration Tests

    Exercises the full encrypted chat pipeline over the in-process
    transport:
    - Key publication and initial group key distribution
    - Rotation on membership change, including burst coalescing
    - Forward/backward secrecy at the message level
    - Send buffering while a session is not ready
    - Tamper detection and error-state recovery
*/

use meetseal_core::config::{SendPolicy, SessionConfig};
use meetseal_core::core_crypto::DalekCryptoProvider;
use meetseal_core::core_group::MeetingId;
use meetseal_core::core_keys::{
    KeyManagementService, MemoryDirectory, MemoryKeystore, UserId,
};
use meetseal_core::core_session::{
    ChatEvent, ChatSessionService, EncryptedChatSession, Frame, LoopbackHub, SessionHandle,
    SessionState,
};
use meetseal_core::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

struct TestNet {
    hub: Arc<LoopbackHub>,
    directory: Arc<MemoryDirectory>,
    meeting: MeetingId,
}

impl TestNet {
    fn new() -> Self {
        Self {
            hub: LoopbackHub::new(),
            directory: Arc::new(MemoryDirectory::new()),
            meeting: MeetingId::random(),
        }
    }

    fn service(&self) -> ChatSessionService {
        ChatSessionService::new(
            SessionConfig::default(),
            Arc::new(ShutdownCoordinator::new(Duration::from_millis(50))),
        )
    }

    fn keys(&self) -> KeyManagementService {
        KeyManagementService::new(
            Arc::new(MemoryKeystore::new()),
            Arc::clone(&self.directory) as Arc<dyn meetseal_core::core_keys::KeyDirectory>,
            Arc::new(DalekCryptoProvider::new()),
        )
    }

    /// A started session plus its raw inbound frame stream
    async fn session(
        &self,
        name: &str,
        members: Option<Vec<UserId>>,
        config: SessionConfig,
    ) -> (EncryptedChatSession, mpsc::UnboundedReceiver<Frame>) {
        let (transport, rx) = self.hub.register(UserId::from(name)).await;
        let mut session = EncryptedChatSession::new(
            self.meeting.clone(),
            self.keys(),
            Arc::new(transport),
            config,
        );
        session.start(UserId::from(name), members).await.unwrap();
        (session, rx)
    }

    /// A started session running on its own task, with frames pumped
    /// from the hub and an event subscription taken before any inbound
    /// traffic is processed
    ///
    /// Each party gets its own `ChatSessionService` (one per simulated
    /// process): the service replaces sessions by meeting id, so sharing
    /// one would close earlier parties.
    async fn party(
        &self,
        _service: &ChatSessionService,
        name: &str,
        members: Option<Vec<UserId>>,
    ) -> (SessionHandle, broadcast::Receiver<ChatEvent>) {
        let (session, mut rx) = self.session(name, members, SessionConfig::default()).await;
        let handle = self.service().open(session).await.unwrap();
        let events = handle.subscribe();

        let pump = handle.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if pump.inbound(frame).await.is_err() {
                    break;
                }
            }
        });
        (handle, events)
    }
}

fn uid(name: &str) -> UserId {
    UserId::from(name)
}

/// Wait for the first event `pick` accepts, skipping the rest
async fn await_event<T>(
    events: &mut broadcast::Receiver<ChatEvent>,
    mut pick: impl FnMut(ChatEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(value) = pick(event) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_two_party_message_roundtrip() {
    let net = TestNet::new();
    let service = net.service();

    let (_bob, mut bob_events) = net.party(&service, "bob", None).await;
    let (alice, _alice_events) =
        net.party(&service, "alice", Some(vec![uid("alice"), uid("bob")])).await;

    alice.send_message(b"hello everyone".to_vec()).await.unwrap();

    let (sender, plaintext) = await_event(&mut bob_events, |e| match e {
        ChatEvent::MessageDecrypted { sender_id, plaintext, .. } => Some((sender_id, plaintext)),
        _ => None,
    })
    .await;
    assert_eq!(sender, uid("alice"));
    assert_eq!(plaintext, b"hello everyone");
}

#[tokio::test]
async fn test_late_joiner_cannot_read_history() {
    let net = TestNet::new();
    let service = net.service();

    // Carol is on the wire from the start but not in the group, so she
    // sees the epoch-1 traffic without holding its key.
    let (_bob, mut bob_events) = net.party(&service, "bob", None).await;
    let (_carol, mut carol_events) = net.party(&service, "carol", None).await;
    let (alice, _alice_events) =
        net.party(&service, "alice", Some(vec![uid("alice"), uid("bob")])).await;

    alice.send_message(b"hello".to_vec()).await.unwrap();

    let epoch = await_event(&mut carol_events, |e| match e {
        ChatEvent::MessageUndecryptable { epoch, .. } => Some(epoch),
        _ => None,
    })
    .await;
    assert_eq!(epoch, 1);

    // Carol joins: rotation to epoch 2, and she can read from there on.
    alice.roster_changed(vec![uid("alice"), uid("bob"), uid("carol")]).await.unwrap();
    settle().await;
    alice.send_message(b"welcome carol".to_vec()).await.unwrap();

    let plaintext = await_event(&mut carol_events, |e| match e {
        ChatEvent::MessageDecrypted { plaintext, .. } => Some(plaintext),
        _ => None,
    })
    .await;
    assert_eq!(plaintext, b"welcome carol");

    // Bob held the epoch-1 key and keeps up across the rotation.
    let first = await_event(&mut bob_events, |e| match e {
        ChatEvent::MessageDecrypted { plaintext, .. } => Some(plaintext),
        _ => None,
    })
    .await;
    assert_eq!(first, b"hello");
    let second = await_event(&mut bob_events, |e| match e {
        ChatEvent::MessageDecrypted { plaintext, .. } => Some(plaintext),
        _ => None,
    })
    .await;
    assert_eq!(second, b"welcome carol");
}

#[tokio::test]
async fn test_removed_member_cannot_read_new_messages() {
    let net = TestNet::new();
    let service = net.service();

    let (_bob, mut bob_events) = net.party(&service, "bob", None).await;
    let (alice, _alice_events) =
        net.party(&service, "alice", Some(vec![uid("alice"), uid("bob")])).await;
    settle().await;

    // Bob is removed; the rotation gives him no epoch-2 envelope.
    alice.roster_changed(vec![uid("alice")]).await.unwrap();
    settle().await;
    alice.send_message(b"private now".to_vec()).await.unwrap();

    let epoch = await_event(&mut bob_events, |e| match e {
        ChatEvent::MessageUndecryptable { epoch, .. } => Some(epoch),
        _ => None,
    })
    .await;
    assert_eq!(epoch, 2);
}

#[tokio::test]
async fn test_roster_change_burst_coalesces_to_one_rotation() {
    let net = TestNet::new();
    let service = net.service();

    let (_bob, _bob_events) = net.party(&service, "bob", None).await;
    let (_carol, _carol_events) = net.party(&service, "carol", None).await;
    let (alice, mut alice_events) =
        net.party(&service, "alice", Some(vec![uid("alice")])).await;
    settle().await;

    // Two roster changes land on the queue in the same tick; the
    // session task coalesces them into one rotation to the newest.
    alice.roster_changed(vec![uid("alice"), uid("bob")]).await.unwrap();
    alice.roster_changed(vec![uid("alice"), uid("bob"), uid("carol")]).await.unwrap();
    settle().await;

    let mut rotations = Vec::new();
    while let Ok(event) = alice_events.try_recv() {
        if let ChatEvent::EpochRotated { new_epoch, .. } = event {
            rotations.push(new_epoch);
        }
    }
    assert_eq!(rotations, vec![2]);
}

#[tokio::test]
async fn test_buffered_sends_flush_in_order() {
    let net = TestNet::new();
    let service = net.service();

    let (bob, _bob_events) = net.party(&service, "bob", None).await;

    // Bob has no group key yet; both sends are buffered.
    bob.send_message(b"first".to_vec()).await.unwrap();
    bob.send_message(b"second".to_vec()).await.unwrap();

    let (_alice, mut alice_events) =
        net.party(&service, "alice", Some(vec![uid("alice"), uid("bob")])).await;
    settle().await;

    let first = await_event(&mut alice_events, |e| match e {
        ChatEvent::MessageDecrypted { plaintext, .. } => Some(plaintext),
        _ => None,
    })
    .await;
    let second = await_event(&mut alice_events, |e| match e {
        ChatEvent::MessageDecrypted { plaintext, .. } => Some(plaintext),
        _ => None,
    })
    .await;
    assert_eq!(first, b"first");
    assert_eq!(second, b"second");
}

#[tokio::test]
async fn test_tampered_message_is_surfaced_not_fatal() {
    let net = TestNet::new();

    let (mut bob, mut bob_rx) = net.session("bob", None, SessionConfig::default()).await;
    let (mut alice, _alice_rx) = net
        .session("alice", Some(vec![uid("alice"), uid("bob")]), SessionConfig::default())
        .await;

    // Bob installs the epoch-1 envelope.
    let frame = bob_rx.recv().await.unwrap();
    bob.handle_frame(frame).await.unwrap();
    assert_eq!(bob.state(), SessionState::Ready);

    alice.send_message(b"integrity matters").await.unwrap();
    let frame = bob_rx.recv().await.unwrap();
    let tampered = match frame {
        Frame::Message(mut msg) => {
            msg.ciphertext[0] ^= 0x01;
            Frame::Message(msg)
        }
        Frame::Envelope(_) => panic!("expected a message frame"),
    };

    let mut events = bob.subscribe();
    bob.handle_frame(tampered).await.unwrap();

    let reason = await_event(&mut events, |e| match e {
        ChatEvent::MessageUndecryptable { reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert!(reason.contains("authentication"));
    // The session is unaffected.
    assert_eq!(bob.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_retry_recovers_from_error_state() {
    let net = TestNet::new();
    let config = SessionConfig {
        max_rotation_failures: 1,
        send_policy: SendPolicy::Buffer,
        ..Default::default()
    };

    // Bob publishes a key but is unreachable on the transport.
    let mut bob_keys = net.keys();
    bob_keys.initialize(uid("bob")).await.unwrap();

    let (mut alice, _alice_rx) =
        net.session("alice", Some(vec![uid("alice")]), config).await;
    assert_eq!(alice.current_epoch(), Some(1));

    let result = alice.apply_roster(&[uid("alice"), uid("bob")]).await;
    assert!(result.is_err());
    assert_eq!(alice.state(), SessionState::Error);

    // Sends buffer while in the error state.
    assert_eq!(alice.send_message(b"queued").await.unwrap(), None);

    // Bob comes online; retry rebuilds key state on a fresh epoch.
    let (_bob_transport, mut bob_rx) = net.hub.register(uid("bob")).await;
    alice.retry_encryption().await.unwrap();
    assert_eq!(alice.state(), SessionState::Ready);
    // Epoch 2 was burned by the failed rotation; the retry moves past it.
    assert_eq!(alice.current_epoch(), Some(3));

    // Bob got the retry's envelope and the flushed message.
    assert!(matches!(bob_rx.recv().await.unwrap(), Frame::Envelope(_)));
    assert!(matches!(bob_rx.recv().await.unwrap(), Frame::Message(_)));
}
