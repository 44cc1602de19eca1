use anyhow::Result;
use clap::{Parser, Subcommand};
use meetseal_core::config::{Config, SessionConfig};
use meetseal_core::core_crypto::DalekCryptoProvider;
use meetseal_core::core_group::MeetingId;
use meetseal_core::core_keys::{KeyManagementService, MemoryDirectory, MemoryKeystore, UserId};
use meetseal_core::core_session::{
    ChatEvent, ChatSessionService, EncryptedChatSession, Frame, LoopbackHub, SessionHandle,
};
use meetseal_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use meetseal_core::metrics::init_metrics;
use meetseal_core::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "meetseal")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a three-party encrypted chat over the in-process transport
    Demo {
        /// First message sent into the group
        #[arg(default_value = "hello everyone")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: LogLevel = args.log_level.parse().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });
    let log_config = LogConfig::new(log_level).json_format(args.json_logs);
    init_logging_with_config(log_config)?;

    let config = Config::from_env()?;
    if config.metrics.enabled {
        init_metrics();
    }

    match args.command {
        Some(Command::Demo { message }) => run_demo(config.session, message).await?,
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

struct Participant {
    name: &'static str,
    handle: SessionHandle,
}

/// Build a key service backed by the shared directory and a fresh
/// in-memory keystore
fn key_service(directory: &Arc<MemoryDirectory>) -> KeyManagementService {
    KeyManagementService::new(
        Arc::new(MemoryKeystore::new()),
        Arc::clone(directory) as Arc<dyn meetseal_core::core_keys::KeyDirectory>,
        Arc::new(DalekCryptoProvider::new()),
    )
}

/// Pump inbound frames from the hub into the session task
fn pump_frames(handle: SessionHandle, mut rx: UnboundedReceiver<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if handle.inbound(frame).await.is_err() {
                break;
            }
        }
    });
}

/// Print session events as they happen
fn watch_events(name: &'static str, handle: &SessionHandle) {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::MessageDecrypted { sender_id, plaintext, .. } => {
                    info!(
                        participant = name,
                        from = %sender_id,
                        text = %String::from_utf8_lossy(&plaintext),
                        "Message received"
                    );
                }
                ChatEvent::MessageUndecryptable { sender_id, epoch, reason, .. } => {
                    warn!(
                        participant = name,
                        from = %sender_id,
                        epoch,
                        reason = %reason,
                        "Message could not be decrypted"
                    );
                }
                ChatEvent::EpochRotated { new_epoch, skipped, .. } => {
                    info!(participant = name, new_epoch, skipped = skipped.len(), "Epoch rotated");
                }
                ChatEvent::StateChanged { from, to } => {
                    info!(participant = name, %from, %to, "State changed");
                }
                ChatEvent::RotationWarning { message } => {
                    warn!(participant = name, %message, "Rotation warning");
                }
                ChatEvent::SessionFailed { reason } => {
                    warn!(participant = name, %reason, "Session failed");
                }
            }
        }
    });
}

async fn join(
    service: &ChatSessionService,
    hub: &Arc<LoopbackHub>,
    directory: &Arc<MemoryDirectory>,
    meeting: &MeetingId,
    config: &SessionConfig,
    name: &'static str,
    initial_members: Option<Vec<UserId>>,
) -> Result<Participant> {
    let (transport, rx) = hub.register(UserId::from(name)).await;
    let mut session = EncryptedChatSession::new(
        meeting.clone(),
        key_service(directory),
        Arc::new(transport),
        config.clone(),
    );
    session.start(UserId::from(name), initial_members).await?;

    let handle = service.open(session).await?;
    watch_events(name, &handle);
    pump_frames(handle.clone(), rx);
    Ok(Participant { name, handle })
}

async fn run_demo(config: SessionConfig, message: String) -> Result<()> {
    info!("Starting encrypted chat demo");

    let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_millis(500)));
    let service = ChatSessionService::new(config.clone(), Arc::clone(&shutdown));
    let hub = LoopbackHub::new();
    let directory = Arc::new(MemoryDirectory::new());
    let meeting = MeetingId::random();
    info!(meeting = %meeting, "Meeting created");

    // Bob joins first so his public key is published before Alice
    // builds the initial roster.
    let bob = join(&service, &hub, &directory, &meeting, &config, "bob", None).await?;
    let alice = join(
        &service,
        &hub,
        &directory,
        &meeting,
        &config,
        "alice",
        Some(vec![UserId::from("alice"), UserId::from("bob")]),
    )
    .await?;
    settle().await;

    alice.handle.send_message(message.into_bytes()).await?;
    settle().await;

    // Carol arrives; the roster change rotates the group key.
    let carol = join(&service, &hub, &directory, &meeting, &config, "carol", None).await?;
    alice
        .handle
        .roster_changed(vec![
            UserId::from("alice"),
            UserId::from("bob"),
            UserId::from("carol"),
        ])
        .await?;
    settle().await;

    alice.handle.send_message(b"welcome carol".to_vec()).await?;
    settle().await;

    // Bob leaves; he keeps receiving broadcasts but cannot read the
    // post-rotation epoch.
    alice
        .handle
        .roster_changed(vec![UserId::from("alice"), UserId::from("carol")])
        .await?;
    settle().await;

    alice.handle.send_message(b"just the two of us now".to_vec()).await?;
    settle().await;

    for participant in [&alice, &bob, &carol] {
        info!(participant = participant.name, "Closing session");
    }
    service.shutdown().await;
    info!("Demo complete");
    Ok(())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
