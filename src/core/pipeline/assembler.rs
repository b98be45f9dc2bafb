//! Assembler: rebuilds one file from its data frames.
//!
//! Each frame is appended first and the counter checked after, so the frame
//! that lands exactly on the declared size is kept. Anything arriving once
//! the file is complete, or that would run past the declared size, is
//! rejected whole and leaves the buffer untouched.

use crate::core::error::AssembleError;
use crate::core::protocol::manifest::FileDescriptor;
use bytes::{Bytes, BytesMut};

/// Pre-allocation cap, so a bogus declared size cannot reserve unbounded
/// memory before any byte arrives.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// A completely received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub descriptor: FileDescriptor,
    pub data: Bytes,
}

impl Artifact {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn mime(&self) -> &str {
        &self.descriptor.mime
    }
}

#[derive(Debug)]
pub struct Assembler {
    descriptor: FileDescriptor,
    buffer: BytesMut,
    received: u64,
}

impl Assembler {
    pub fn new(descriptor: FileDescriptor) -> Self {
        let capacity = descriptor.size.min(MAX_PREALLOC) as usize;
        Self {
            descriptor,
            buffer: BytesMut::with_capacity(capacity),
            received: 0,
        }
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.descriptor.size
    }

    /// Append one frame and return the fraction of the file received so far.
    pub fn receive(&mut self, frame: &[u8]) -> Result<f64, AssembleError> {
        let len = frame.len() as u64;
        if self.is_complete() || self.received + len > self.descriptor.size {
            return Err(AssembleError::Overflow {
                name: self.descriptor.name.clone(),
                len: frame.len(),
                received: self.received,
                expected: self.descriptor.size,
            });
        }

        self.buffer.extend_from_slice(frame);
        self.received += len;
        Ok(self.fraction())
    }

    fn fraction(&self) -> f64 {
        if self.descriptor.size == 0 {
            1.0
        } else {
            self.received as f64 / self.descriptor.size as f64
        }
    }

    /// Hand over the file. Fails unless every declared byte has arrived; the
    /// partial buffer is dropped in that case.
    pub fn finalize(self) -> Result<Artifact, AssembleError> {
        if !self.is_complete() {
            return Err(AssembleError::Incomplete {
                name: self.descriptor.name,
                received: self.received,
                expected: self.descriptor.size,
            });
        }
        Ok(Artifact {
            descriptor: self.descriptor,
            data: self.buffer.freeze(),
        })
    }
}
