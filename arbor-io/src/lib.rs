//! Core traits and implementations for positioned IO.
//!
//! The basket engine never opens files itself. It reads records through [`ReadAt`] and appends
//! them through a [`RecordSink`], which reports where each record landed. This crate provides
//! in-memory and file-backed implementations of both.

pub use file::*;
pub use read::*;
pub use write::*;

mod file;
mod read;
mod write;
