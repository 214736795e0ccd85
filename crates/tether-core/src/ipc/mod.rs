//! Inter-process communication for tether worker processes.
//!
//! This module provides the frame protocol and the worker-side loop used by
//! worker binaries that host entries in a separate process.

pub mod protocol;
mod serve;

pub use protocol::{HostCommand, MAX_FRAME_BYTES, WorkerEvent, read_message, write_message};
pub use serve::{serve, serve_io};
