pub mod atomic_write;
pub mod path;
pub mod sos;
