//! Outgoing file sources: a path on disk or an in-memory buffer.

use crate::core::protocol::manifest::{FileDescriptor, DEFAULT_MIME};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A file queued for sending, with the descriptor announced to the receiver.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub descriptor: FileDescriptor,
    source: FileSource,
}

impl OutgoingFile {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot stat {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", path.display());
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime = guess_mime(&name);

        Ok(Self {
            descriptor: FileDescriptor::new(name, meta.len(), mime),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, data: Bytes) -> Self {
        Self {
            descriptor: FileDescriptor::new(name, data.len() as u64, mime),
            source: FileSource::Memory(data),
        }
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Open a fresh reader positioned at the start of the file.
    pub async fn open(&self) -> Result<ByteSource> {
        match &self.source {
            FileSource::Path(p) => {
                let file = tokio::fs::File::open(p)
                    .await
                    .with_context(|| format!("cannot open {}", p.display()))?;
                Ok(Box::new(file))
            }
            FileSource::Memory(b) => Ok(Box::new(Cursor::new(b.clone()))),
        }
    }
}

/// MIME type from a file name's extension.
pub fn guess_mime(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_MIME,
    };
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "js" => "text/javascript",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("roomdrop_test")
            .join(format!("{}_{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_mime("README"), DEFAULT_MIME);
        assert_eq!(guess_mime("weird.xyz"), DEFAULT_MIME);
    }

    #[tokio::test]
    async fn test_from_path_reads_metadata_and_content() {
        let dir = temp_dir("source");
        let path = dir.join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let file = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(file.descriptor.name, "hello.txt");
        assert_eq!(file.descriptor.size, 11);
        assert_eq!(file.descriptor.mime, "text/plain");

        let mut buf = Vec::new();
        file.open().await.unwrap().read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");

        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_from_path_rejects_directories() {
        let dir = temp_dir("source_dir");
        assert!(OutgoingFile::from_path(&dir).await.is_err());
        assert!(OutgoingFile::from_path(dir.join("missing")).await.is_err());
        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_memory_source_reopens_from_start() {
        let file = OutgoingFile::from_bytes("a.bin", "", Bytes::from_static(b"abc"));
        assert_eq!(file.descriptor.mime, DEFAULT_MIME);
        for _ in 0..2 {
            let mut buf = Vec::new();
            file.open().await.unwrap().read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"abc");
        }
    }
}
