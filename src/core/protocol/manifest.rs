//! File manifest: the immutable descriptor of one file in a transfer.
//!
//! Rules:
//! - Created by the sender, never modified afterwards
//! - Carried in the request and in every file-scoped control frame
//! - `name` is a display name only; receivers sanitize before touching disk

use serde::{Deserialize, Serialize};

/// MIME type used when nothing better is known.
pub const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    #[serde(default = "default_mime")]
    pub mime: String,
}

fn default_mime() -> String {
    DEFAULT_MIME.to_string()
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        Self {
            name: name.into(),
            size,
            mime: if mime.is_empty() { default_mime() } else { mime },
        }
    }
}

/// Aggregate byte count of a manifest.
pub fn total_size(files: &[FileDescriptor]) -> u64 {
    files.iter().map(|f| f.size).sum()
}
