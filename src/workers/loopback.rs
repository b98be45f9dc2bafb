//! Loopback room: a sender and a receiver peer in one process, talking over
//! the in-memory relay. The receiver accepts every request and writes the
//! artifacts it gets to the output directory.

use crate::core::config::TransferConfig;
use crate::core::connection::{Connector, RtcConnector};
use crate::core::engine::{ConnectionStatus, Coordinator, CoordinatorEvent, Direction};
use crate::core::pipeline::assembler::Artifact;
use crate::core::pipeline::source::OutgoingFile;
use crate::core::signaling::{LocalRelay, PeerId, PeerIdentity, RoomSignals, Roster, SignalingChannel};
use crate::core::transaction::TransferState;
use crate::utils::atomic_write::atomic_write;
use crate::utils::path::{safe_file_name, unique_path};
use crate::utils::sos::SignalOfStop;
use crate::workers::args::Args;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

pub const SENDER: &str = "sender";
pub const RECEIVER: &str = "receiver";

/// How long the receiver may lag behind a sender that already went idle.
const RECEIVE_GRACE: Duration = Duration::from_secs(30);

/// Entry point for the CLI: real WebRTC links between the two peers.
pub async fn run(args: Args, sos: SignalOfStop) -> Result<()> {
    if args.files.is_empty() {
        bail!("no files given");
    }

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(OutgoingFile::from_path(path).await?);
    }

    let config = args.transfer_config();
    let connector: Arc<dyn Connector> = Arc::new(
        RtcConnector::new(&args.ice_config(), config.low_water).context("creating WebRTC API")?,
    );
    let relay: Arc<dyn SignalingChannel> = Arc::new(LocalRelay::new());

    let saved = transfer(
        files,
        &args.out_dir(),
        args.room(),
        relay,
        (connector.clone(), connector),
        config,
        sos,
    )
    .await?;

    for path in &saved {
        println!("{}", path.display());
    }
    Ok(())
}

/// Send `files` from [`SENDER`] to [`RECEIVER`] and return the paths the
/// receiver wrote, in arrival order.
pub async fn transfer(
    files: Vec<OutgoingFile>,
    out_dir: &Path,
    room: &str,
    relay: Arc<dyn SignalingChannel>,
    (sender_link, receiver_link): (Arc<dyn Connector>, Arc<dyn Connector>),
    config: TransferConfig,
    sos: SignalOfStop,
) -> Result<Vec<PathBuf>> {
    let sender_id = PeerIdentity::native(PeerId::new(SENDER), "Sender");
    let receiver_id = PeerIdentity::native(PeerId::new(RECEIVER), "Receiver");

    let (sender, mut sender_events) = Coordinator::spawn(
        sender_id.clone(),
        room,
        relay.clone(),
        sender_link,
        config.clone(),
        sos.clone(),
    )
    .await?;
    let (receiver, mut receiver_events) = Coordinator::spawn(
        receiver_id.clone(),
        room,
        relay.clone(),
        receiver_link,
        config,
        sos.clone(),
    )
    .await?;

    RoomSignals::new(relay, room, sender_id.id.clone())
        .publish_roster(&Roster {
            participants: vec![sender_id, receiver_id],
        })
        .await
        .context("announcing room roster")?;

    let expected = files.len();
    let sid = sender.request(receiver.local(), files).await?;
    info!(event = "loopback_request", %sid, files = expected);

    let mut saved = Vec::with_capacity(expected);
    let mut accepted = false;
    let mut grace: Option<Instant> = None;

    let outcome: Result<()> = loop {
        if saved.len() == expected {
            break Ok(());
        }

        tokio::select! {
            _ = sos.wait() => break Err(anyhow::anyhow!("interrupted")),

            _ = sleep_until(grace.unwrap_or_else(Instant::now)), if grace.is_some() => {
                break Err(anyhow::anyhow!(
                    "receiver got {} of {expected} files before the sender stopped",
                    saved.len()
                ));
            }

            event = receiver_events.recv() => {
                let Some(event) = event else {
                    break Err(anyhow::anyhow!("receiver stopped"));
                };
                match event {
                    CoordinatorEvent::RequestReceived(request) => {
                        info!(
                            event = "loopback_accept",
                            from = %request.from,
                            files = request.files.len()
                        );
                        if let Err(e) = receiver.accept(&request.from).await {
                            break Err(e.into());
                        }
                    }
                    CoordinatorEvent::FileReceived { artifact, .. } => {
                        match save_artifact(out_dir, &artifact) {
                            Ok(path) => saved.push(path),
                            Err(e) => break Err(e),
                        }
                    }
                    CoordinatorEvent::Progress { direction: Direction::Incoming, progress: Some(p), .. } => {
                        debug!(event = "loopback_progress", progress = format!("{:.0}%", p * 100.0));
                    }
                    other => debug!(event = "loopback_receiver_event", ?other),
                }
            }

            event = sender_events.recv() => {
                let Some(event) = event else {
                    break Err(anyhow::anyhow!("sender stopped"));
                };
                match event {
                    CoordinatorEvent::TransferStatus { state: Some(TransferState::Accepted), .. } => accepted = true,
                    CoordinatorEvent::TransferStatus { state: Some(TransferState::Rejected), .. } => {
                        break Err(anyhow::anyhow!("request rejected"));
                    }
                    CoordinatorEvent::TransferStatus { state: None, .. } if accepted => {
                        grace = Some(Instant::now() + RECEIVE_GRACE);
                    }
                    CoordinatorEvent::RequestExpired { .. } => {
                        break Err(anyhow::anyhow!("request expired"));
                    }
                    CoordinatorEvent::ConnectionStatus { status: Some(ConnectionStatus::Error), .. } => {
                        break Err(anyhow::anyhow!("connection failed"));
                    }
                    other => debug!(event = "loopback_sender_event", ?other),
                }
            }
        }
    };

    sender.shutdown().await;
    receiver.shutdown().await;

    match outcome {
        Ok(()) => {
            info!(event = "loopback_done", files = saved.len(), out = %out_dir.display());
            Ok(saved)
        }
        Err(e) => {
            warn!(event = "loopback_failure", error = %e, received = saved.len());
            Err(e)
        }
    }
}

/// Write an artifact under a sanitized, non-colliding name.
fn save_artifact(out_dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    let name = safe_file_name(artifact.name());
    let path = unique_path(out_dir, &name);
    atomic_write(&path, &artifact.data)
        .with_context(|| format!("saving {}", path.display()))?;
    info!(event = "artifact_saved", path = %path.display(), size = artifact.data.len());
    Ok(path)
}
