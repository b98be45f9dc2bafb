//! Data-channel frames.
//!
//! Control frames travel as JSON text messages tagged by `type`; file bytes
//! travel as raw binary messages. The message kind alone tells them apart,
//! there is no header byte.

use crate::core::error::ProtocolViolation;
use crate::core::protocol::manifest::FileDescriptor;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Wire payload ─────────────────────────────────────────────────────────────

/// One data-channel message as the transport sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePayload {
    Text(String),
    Binary(Bytes),
}

impl WirePayload {
    pub fn len(&self) -> usize {
        match self {
            WirePayload::Text(s) => s.len(),
            WirePayload::Binary(b) => b.len(),
        }
    }
}

// ── Control frames ───────────────────────────────────────────────────────────

/// Structured frames that bracket and annotate the byte stream. Every frame
/// carries the `sid` of the transfer batch it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    #[serde(rename = "transition-info")]
    Info { sid: Uuid, size: u64, count: usize },

    #[serde(rename = "transition-start")]
    Start { sid: Uuid },

    #[serde(rename = "transition-end")]
    End { sid: Uuid },

    #[serde(rename = "transition-file-start")]
    FileStart {
        sid: Uuid,
        #[serde(flatten)]
        meta: FileDescriptor,
    },

    #[serde(rename = "transition-file-end")]
    FileEnd {
        sid: Uuid,
        #[serde(flatten)]
        meta: FileDescriptor,
    },

    #[serde(rename = "transition-file-progress")]
    FileProgress {
        sid: Uuid,
        progress: f64,
        #[serde(flatten)]
        meta: FileDescriptor,
    },
}

impl ControlFrame {
    pub fn sid(&self) -> Uuid {
        match self {
            ControlFrame::Info { sid, .. }
            | ControlFrame::Start { sid }
            | ControlFrame::End { sid }
            | ControlFrame::FileStart { sid, .. }
            | ControlFrame::FileEnd { sid, .. }
            | ControlFrame::FileProgress { sid, .. } => *sid,
        }
    }

    /// Wire tag, for logs and violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlFrame::Info { .. } => "transition-info",
            ControlFrame::Start { .. } => "transition-start",
            ControlFrame::End { .. } => "transition-end",
            ControlFrame::FileStart { .. } => "transition-file-start",
            ControlFrame::FileEnd { .. } => "transition-file-end",
            ControlFrame::FileProgress { .. } => "transition-file-progress",
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(ControlFrame),
    /// Raw file bytes, belonging to the most recently started file.
    Data(Bytes),
}

impl Frame {
    pub fn encode(&self) -> serde_json::Result<WirePayload> {
        Ok(match self {
            Frame::Control(c) => WirePayload::Text(serde_json::to_string(c)?),
            Frame::Data(b) => WirePayload::Binary(b.clone()),
        })
    }

    pub fn decode(payload: WirePayload) -> Result<Frame, ProtocolViolation> {
        match payload {
            WirePayload::Binary(b) => Ok(Frame::Data(b)),
            WirePayload::Text(s) => serde_json::from_str::<ControlFrame>(&s)
                .map(Frame::Control)
                .map_err(|e| ProtocolViolation::Malformed(e.to_string())),
        }
    }
}

impl From<ControlFrame> for Frame {
    fn from(c: ControlFrame) -> Self {
        Frame::Control(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FileDescriptor {
        FileDescriptor::new("notes.txt", 12, "text/plain")
    }

    #[test]
    fn test_file_frames_flatten_descriptor() {
        let sid = Uuid::new_v4();
        let frame = ControlFrame::FileProgress {
            sid,
            progress: 0.5,
            meta: meta(),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "transition-file-progress");
        assert_eq!(v["name"], "notes.txt");
        assert_eq!(v["size"], 12);
        assert_eq!(v["mime"], "text/plain");
        assert_eq!(v["progress"], 0.5);
        assert_eq!(v["sid"], sid.to_string());
    }

    #[test]
    fn test_decode_control_from_text() {
        let sid = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"transition-file-start","sid":"{sid}","name":"a.bin","size":7,"mime":"application/octet-stream"}}"#
        );
        let frame = Frame::decode(WirePayload::Text(text)).unwrap();
        match frame {
            Frame::Control(ControlFrame::FileStart { sid: got, meta }) => {
                assert_eq!(got, sid);
                assert_eq!(meta.name, "a.bin");
                assert_eq!(meta.size, 7);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_binary_is_always_data() {
        // Bytes that happen to look like JSON still count as file data.
        let raw = Bytes::from_static(br#"{"type":"transition-end"}"#);
        let frame = Frame::decode(WirePayload::Binary(raw.clone())).unwrap();
        assert_eq!(frame, Frame::Data(raw));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Frame::decode(WirePayload::Text(r#"{"type":"ping"}"#.into())).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed(_)));

        let err = Frame::decode(WirePayload::Text("not json".into())).unwrap_err();
        assert!(matches!(err, ProtocolViolation::Malformed(_)));
    }

    #[test]
    fn test_encode_kinds() {
        let sid = Uuid::new_v4();
        let text = Frame::from(ControlFrame::End { sid }).encode().unwrap();
        assert!(matches!(text, WirePayload::Text(_)));

        let data = Frame::Data(Bytes::from_static(b"abc")).encode().unwrap();
        assert_eq!(data, WirePayload::Binary(Bytes::from_static(b"abc")));
        assert_eq!(data.len(), 3);
    }
}
