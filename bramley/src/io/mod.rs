//! I/O functions
//!

pub(crate) mod file;
