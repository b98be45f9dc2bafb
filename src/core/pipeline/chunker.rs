//! Chunker: lazily splits one file's byte source into data frames.
//!
//! The sequence is finite and non-restartable: it covers the source exactly
//! once, front to back. The source must produce exactly the declared number
//! of bytes; a short or long source is reported as an error instead of
//! silently producing a file of the wrong size.

use crate::core::error::ChunkError;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One slice of the source plus the progress reached after emitting it.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    /// Bytes emitted so far divided by the declared size.
    pub progress: f64,
    pub last: bool,
}

pub struct Chunker<R> {
    reader: R,
    size: u64,
    emitted: u64,
    chunk_size: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> Chunker<R> {
    pub fn new(reader: R, size: u64, chunk_size: usize) -> Self {
        Self {
            reader,
            size,
            emitted: 0,
            chunk_size: chunk_size.max(1),
            finished: false,
        }
    }

    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        self.emitted as f64 / self.size as f64
    }

    /// Read the next chunk. `Ok(None)` signals completion; an empty source
    /// completes without producing any chunk.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ChunkError> {
        if self.finished {
            return Ok(None);
        }

        if self.emitted == self.size {
            self.finished = true;
            // The source must end exactly at the declared size.
            let mut probe = [0u8; 1];
            if self.reader.read(&mut probe).await? > 0 {
                return Err(ChunkError::Oversized {
                    expected: self.size,
                });
            }
            return Ok(None);
        }

        let remaining = self.size - self.emitted;
        let want = (self.chunk_size as u64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;

        while filled < want {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.finished = true;
                return Err(ChunkError::Truncated {
                    read: self.emitted + filled as u64,
                    expected: self.size,
                });
            }
            filled += n;
        }

        self.emitted += want as u64;
        Ok(Some(Chunk {
            data: Bytes::from(buf),
            progress: self.emitted as f64 / self.size as f64,
            last: self.emitted == self.size,
        }))
    }
}
