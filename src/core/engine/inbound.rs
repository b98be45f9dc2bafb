//! Receiving side of a transfer: turns the frame stream of one peer into
//! artifacts and progress.

use crate::core::error::ProtocolViolation;
use crate::core::pipeline::assembler::{Artifact, Assembler};
use crate::core::protocol::frame::{ControlFrame, Frame};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Aggregate progress over the announced file count.
    Progress(f64),
    FileReceived(Artifact),
    /// `transition-end`: progress is absent again.
    Finished,
}

#[derive(Debug, Default)]
pub struct InboundSession {
    sid: Option<Uuid>,
    expected: usize,
    completed: usize,
    current: Option<Assembler>,
}

impl InboundSession {
    pub fn is_active(&self) -> bool {
        self.sid.is_some()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn handle(&mut self, frame: Frame) -> Result<Vec<InboundOutcome>, ProtocolViolation> {
        let control = match frame {
            Frame::Data(bytes) => {
                let assembler = self.current.as_mut().ok_or(ProtocolViolation::DataWithoutFile)?;
                if let Err(e) = assembler.receive(&bytes) {
                    // A file that overflows is unusable; drop what we have.
                    self.current = None;
                    return Err(e.into());
                }
                return Ok(Vec::new());
            }
            Frame::Control(control) => control,
        };

        if let ControlFrame::Info { sid, count, size } = control {
            if self.abort() {
                warn!(event = "inbound_superseded", %sid, "New transfer replaced an unfinished one");
            }
            debug!(event = "inbound_info", %sid, count, size);
            self.sid = Some(sid);
            self.expected = count;
            return Ok(vec![InboundOutcome::Progress(0.0)]);
        }

        self.check_sid(&control)?;
        match control {
            ControlFrame::Info { .. } | ControlFrame::Start { .. } => Ok(Vec::new()),
            ControlFrame::FileStart { meta, .. } => {
                if let Some(partial) = self.current.take() {
                    warn!(
                        event = "inbound_file_abandoned",
                        name = %partial.descriptor().name,
                        received = partial.received(),
                        "File started before the previous one ended"
                    );
                }
                self.current = Some(Assembler::new(meta));
                Ok(Vec::new())
            }
            ControlFrame::FileEnd { meta, .. } => {
                let assembler = self
                    .current
                    .take()
                    .ok_or(ProtocolViolation::UnexpectedFrame("transition-file-end"))?;
                if assembler.descriptor().name != meta.name {
                    return Err(ProtocolViolation::FileMismatch {
                        expected: assembler.descriptor().name.clone(),
                        got: meta.name,
                    });
                }
                let artifact = assembler.finalize()?;
                self.completed += 1;
                Ok(vec![
                    InboundOutcome::FileReceived(artifact),
                    InboundOutcome::Progress(self.ratio(0.0)),
                ])
            }
            ControlFrame::FileProgress { progress, .. } => {
                Ok(vec![InboundOutcome::Progress(self.ratio(progress.clamp(0.0, 1.0)))])
            }
            ControlFrame::End { .. } => {
                self.abort();
                Ok(vec![InboundOutcome::Finished])
            }
        }
    }

    /// Forget the current transfer, partial file included. Returns whether
    /// there was anything to forget.
    pub fn abort(&mut self) -> bool {
        let active = self.is_active();
        *self = Self::default();
        active
    }

    fn check_sid(&self, control: &ControlFrame) -> Result<(), ProtocolViolation> {
        match self.sid {
            None => Err(ProtocolViolation::UnexpectedFrame(control.kind())),
            Some(expected) if expected != control.sid() => Err(ProtocolViolation::SessionMismatch {
                expected,
                got: control.sid(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn ratio(&self, current: f64) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        ((self.completed as f64 + current) / self.expected as f64).min(1.0)
    }
}
