//! Wire protocol spoken over the data channel.
//!
//! A transfer batch is framed as:
//! `transition-info`, `transition-start`, then per file
//! `transition-file-start`, (data, `transition-file-progress`)*,
//! `transition-file-end`, and finally `transition-end`.

pub mod frame;
pub mod manifest;
