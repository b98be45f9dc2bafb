//! Chunk pipeline: splitting outgoing files into data frames and rebuilding
//! incoming ones.
//!
//! Chunker and Assembler instances are scoped to a single file and hold no
//! cross-file state.

pub mod assembler;
pub mod chunker;
pub mod source;
