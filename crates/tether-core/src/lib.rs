//! Lifecycle and message-passing handle for isolated worker contexts.
//!
//! This crate provides:
//! - `WorkerHandle`: create, message and terminate one isolated context
//! - Entry points (`Entry`) and the in-context `WorkerScope`
//! - Hosts that run contexts on threads (`ThreadHost`) or in separate
//!   worker processes (`ProcessHost`)
//! - The frame protocol and serve loop for worker binaries

pub mod config;
pub mod entry;
pub mod error;
pub mod handle;
pub mod host;
pub mod ipc;
pub mod message;

pub use config::{EmptyPolicy, HandleConfig, ProcessConfig, RecreatePolicy};
pub use entry::{Entry, EntryFn, EntryRegistry, WorkerScope};
pub use error::{Error, Result};
pub use handle::{HandleState, WorkerHandle};
pub use host::{ContextControl, ContextId, ExecutionContext, ProcessHost, ThreadHost, WorkerHost};
pub use message::Message;
