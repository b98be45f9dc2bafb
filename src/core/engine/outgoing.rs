//! Sending side of a transfer: one task per accepted batch, emitting files
//! strictly one after another over the peer's link.
//!
//! Frame order per batch:
//!
//! ```text
//! transition-info, transition-start,
//!   ( transition-file-start, (data, transition-file-progress)*, transition-file-end )*
//! transition-end
//! ```

use crate::core::connection::PeerLink;
use crate::core::pipeline::chunker::Chunker;
use crate::core::pipeline::source::OutgoingFile;
use crate::core::protocol::frame::{ControlFrame, Frame};
use crate::core::protocol::manifest::{total_size, FileDescriptor};
use crate::core::signaling::PeerId;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingReport {
    Progress { peer: PeerId, sid: Uuid, progress: f64 },
    Finished { peer: PeerId, sid: Uuid },
    Failed { peer: PeerId, sid: Uuid, error: String },
}

/// A running outgoing transfer. Aborting it stops sending at the next
/// suspension point.
#[derive(Debug)]
pub struct Sending {
    pub sid: Uuid,
    handle: JoinHandle<()>,
}

impl Sending {
    pub fn abort(self) {
        self.handle.abort();
    }
}

pub fn spawn(
    link: Arc<PeerLink>,
    sid: Uuid,
    files: Vec<OutgoingFile>,
    chunk_size: usize,
    reports: mpsc::UnboundedSender<OutgoingReport>,
) -> Sending {
    let handle = tokio::spawn(async move {
        let peer = link.peer().clone();
        let report = match send_batch(&link, sid, &files, chunk_size, &reports).await {
            Ok(()) => {
                info!(event = "transfer_sent", peer = %peer, %sid, files = files.len());
                OutgoingReport::Finished { peer, sid }
            }
            Err(e) => {
                warn!(event = "transfer_send_failure", peer = %peer, %sid, error = %format!("{e:#}"));
                OutgoingReport::Failed {
                    peer,
                    sid,
                    error: format!("{e:#}"),
                }
            }
        };
        let _ = reports.send(report);
    });
    Sending { sid, handle }
}

async fn send_batch(
    link: &PeerLink,
    sid: Uuid,
    files: &[OutgoingFile],
    chunk_size: usize,
    reports: &mpsc::UnboundedSender<OutgoingReport>,
) -> Result<()> {
    let descriptors: Vec<FileDescriptor> = files.iter().map(|f| f.descriptor.clone()).collect();
    let count = files.len();
    let progress = |done: usize, current: f64| {
        let _ = reports.send(OutgoingReport::Progress {
            peer: link.peer().clone(),
            sid,
            progress: ((done as f64 + current) / count.max(1) as f64).min(1.0),
        });
    };

    link.send(
        ControlFrame::Info {
            sid,
            size: total_size(&descriptors),
            count,
        }
        .into(),
    )
    .await?;
    link.send(ControlFrame::Start { sid }.into()).await?;

    for (index, file) in files.iter().enumerate() {
        let meta = file.descriptor.clone();
        debug!(event = "file_send_start", peer = %link.peer(), name = %meta.name, size = meta.size);
        link.send(ControlFrame::FileStart { sid, meta: meta.clone() }.into())
            .await?;

        let reader = file
            .open()
            .await
            .with_context(|| format!("opening {}", meta.name))?;
        let mut chunker = Chunker::new(reader, meta.size, chunk_size);
        while let Some(chunk) = chunker
            .next_chunk()
            .await
            .with_context(|| format!("reading {}", meta.name))?
        {
            link.send(Frame::Data(chunk.data)).await?;
            link.send(
                ControlFrame::FileProgress {
                    sid,
                    progress: chunk.progress,
                    meta: meta.clone(),
                }
                .into(),
            )
            .await?;
            progress(index, chunk.progress);
            link.writable().await?;
        }

        link.send(ControlFrame::FileEnd { sid, meta }.into()).await?;
        progress(index + 1, 0.0);
    }

    link.send(ControlFrame::End { sid }.into()).await?;
    link.writable().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TransferConfig;
    use crate::core::connection::types::{IceState, Role, TransportEvent};
    use crate::core::protocol::frame::WirePayload;
    use crate::core::testing::MockTransport;
    use bytes::Bytes;

    fn decode_all(sent: Vec<WirePayload>) -> Vec<Frame> {
        sent.into_iter().map(|p| Frame::decode(p).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_batch_frame_order_and_progress() {
        let (transport, events) = MockTransport::standalone();
        let (notices, _notice_rx) = mpsc::unbounded_channel();
        let link = PeerLink::start(
            PeerId::new("bob"),
            Role::Offerer,
            transport.clone(),
            events,
            &TransferConfig::default(),
            notices,
        );
        transport.emit(TransportEvent::ChannelOpen);
        transport.emit(TransportEvent::Ice(IceState::Connected));

        let files = vec![
            OutgoingFile::from_bytes("a.txt", "text/plain", Bytes::from_static(b"hello")),
            OutgoingFile::from_bytes("b.bin", "", Bytes::from(vec![7u8; 10])),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = Uuid::new_v4();
        let _sending = spawn(link.clone(), sid, files, 4, tx);

        let mut progress = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                OutgoingReport::Progress { progress: p, .. } => progress.push(p),
                OutgoingReport::Finished { sid: done, .. } => {
                    assert_eq!(done, sid);
                    break;
                }
                OutgoingReport::Failed { error, .. } => panic!("send failed: {error}"),
            }
        }
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1.0));

        let frames = decode_all(transport.sent());
        let kinds: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                Frame::Control(c) => c.kind(),
                Frame::Data(_) => "data",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "transition-info",
                "transition-start",
                "transition-file-start",
                "data",
                "transition-file-progress",
                "data",
                "transition-file-progress",
                "transition-file-end",
                "transition-file-start",
                "data",
                "transition-file-progress",
                "data",
                "transition-file-progress",
                "data",
                "transition-file-progress",
                "transition-file-end",
                "transition-end",
            ]
        );
        assert_eq!(
            frames[0],
            Frame::Control(ControlFrame::Info { sid, size: 15, count: 2 })
        );
    }

    #[tokio::test]
    async fn test_failed_link_reports_failure() {
        let (transport, events) = MockTransport::standalone();
        let (notices, _notice_rx) = mpsc::unbounded_channel();
        let link = PeerLink::start(
            PeerId::new("bob"),
            Role::Offerer,
            transport.clone(),
            events,
            &TransferConfig::default(),
            notices,
        );
        // Never opened: every frame stays queued until the link is closed.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = Uuid::new_v4();
        let _sending = spawn(
            link.clone(),
            sid,
            vec![OutgoingFile::from_bytes("a", "text/plain", Bytes::from_static(b"abc"))],
            2,
            tx,
        );

        tokio::task::yield_now().await;
        link.close().await;

        loop {
            match rx.recv().await.unwrap() {
                OutgoingReport::Failed { sid: failed, .. } => {
                    assert_eq!(failed, sid);
                    break;
                }
                OutgoingReport::Progress { .. } => {}
                OutgoingReport::Finished { .. } => panic!("closed link cannot finish"),
            }
        }
        assert!(transport.sent().is_empty());
    }
}
