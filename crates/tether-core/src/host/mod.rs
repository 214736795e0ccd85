//! Worker-execution hosts.
//!
//! A host knows how to start an [`Entry`] in an isolated context and hands
//! back an [`ExecutionContext`]: two queues plus a way to destroy the context.
//! [`WorkerHandle`](crate::WorkerHandle) owns that context and never looks
//! behind it.

mod process;
mod thread;

use std::fmt;
use std::sync::mpsc::{Receiver, Sender};

use uuid::Uuid;

use crate::entry::Entry;
use crate::error::Result;
use crate::message::Message;

pub use process::ProcessHost;
pub use thread::ThreadHost;

/// Something that can run entries in isolated contexts.
pub trait WorkerHost {
    /// Short host name for logs.
    fn name(&self) -> &'static str;

    /// Check that this environment can run contexts at all.
    ///
    /// Returns `Error::UnsupportedEnvironment` if it cannot.
    fn probe(&self) -> Result<()>;

    /// Start `entry` in a fresh context.
    fn launch(&self, entry: &Entry) -> Result<ExecutionContext>;
}

impl<H: WorkerHost + ?Sized> WorkerHost for Box<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn probe(&self) -> Result<()> {
        (**self).probe()
    }

    fn launch(&self, entry: &Entry) -> Result<ExecutionContext> {
        (**self).launch(entry)
    }
}

/// Host-specific way to destroy a running context.
pub trait ContextControl: Send {
    /// Stop the context immediately. Must be safe to call more than once.
    fn terminate(&mut self);

    /// Whether the context is still executing.
    fn is_running(&mut self) -> bool;
}

/// Identifier of one created context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live context as seen from the caller side.
pub struct ExecutionContext {
    id: ContextId,
    entry: &'static str,
    outbound: Sender<Message>,
    inbound: Receiver<Message>,
    control: Box<dyn ContextControl>,
}

impl ExecutionContext {
    /// Assemble a context from its queues and control.
    ///
    /// `outbound` carries messages to the context, `inbound` messages from it.
    pub fn new(
        entry: &'static str,
        outbound: Sender<Message>,
        inbound: Receiver<Message>,
        control: Box<dyn ContextControl>,
    ) -> Self {
        Self {
            id: ContextId::new(),
            entry,
            outbound,
            inbound,
            control,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn entry_name(&self) -> &'static str {
        self.entry
    }

    /// Queue a message for the context. Never blocks.
    ///
    /// Returns `false` if the context no longer accepts messages.
    pub fn post(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub(crate) fn inbound(&self) -> &Receiver<Message> {
        &self.inbound
    }

    pub fn is_running(&mut self) -> bool {
        self.control.is_running()
    }

    /// Destroy the context. Queues are dropped along with `self`.
    pub fn terminate(mut self) {
        self.control.terminate();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}
