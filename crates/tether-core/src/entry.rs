//! Entry points and the worker-side view of a context.
//!
//! An [`Entry`] is a named, statically known function that becomes the whole
//! body of an isolated context. Its body is a plain `fn` pointer, so it cannot
//! capture anything from the caller: all input arrives through the
//! [`WorkerScope`] it receives.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::message::Message;

/// Body of an entry point.
pub type EntryFn = fn(&mut WorkerScope);

/// A named entry point that can run inside a worker context.
#[derive(Clone, Copy)]
pub struct Entry {
    name: &'static str,
    body: EntryFn,
}

impl Entry {
    pub const fn new(name: &'static str, body: EntryFn) -> Self {
        Self { name, body }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the body to completion inside `scope`.
    ///
    /// A panic in the body is caught and returned as its message, so the
    /// host thread (or worker process) outlives the failure.
    pub fn run(&self, scope: &mut WorkerScope) -> std::result::Result<(), String> {
        catch_unwind(AssertUnwindSafe(|| (self.body)(scope))).map_err(|payload| {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            }
        })
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("name", &self.name).finish()
    }
}

/// Lookup table from entry name to entry, used by worker binaries to resolve
/// the entry requested by the parent.
#[derive(Debug, Default, Clone)]
pub struct EntryRegistry {
    entries: FxHashMap<&'static str, Entry>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry. Names must be unique.
    pub fn register(&mut self, entry: Entry) -> Result<()> {
        if self.entries.contains_key(entry.name) {
            return Err(Error::DuplicateEntry(entry.name.to_string()));
        }
        self.entries.insert(entry.name, entry);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, entry: Entry) -> Result<Self> {
        self.register(entry)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The isolated context's end of the message channel.
pub struct WorkerScope {
    entry: &'static str,
    inbound: Receiver<Message>,
    outbound: Sender<Message>,
    terminated: Arc<AtomicBool>,
}

impl WorkerScope {
    pub(crate) fn new(
        entry: &'static str,
        inbound: Receiver<Message>,
        outbound: Sender<Message>,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self { entry, inbound, outbound, terminated }
    }

    /// Name of the entry running in this scope.
    pub fn entry_name(&self) -> &'static str {
        self.entry
    }

    /// Block until the next message arrives.
    ///
    /// Returns `None` once the handle side has gone away.
    pub fn recv(&self) -> Option<Message> {
        if self.is_terminated() {
            return None;
        }
        self.inbound.recv().ok()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        if self.is_terminated() {
            return None;
        }
        match self.inbound.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&self) -> Option<Message> {
        match self.inbound.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Post a message back to the handle.
    ///
    /// Returns `false` if nobody is listening any more.
    pub fn post(&self, message: impl Into<Message>) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.outbound.send(message.into()).is_ok()
    }

    /// Whether the owning handle has terminated this context.
    ///
    /// Long computations on thread hosts should poll this, since a thread
    /// cannot be stopped from outside.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn noop(_scope: &mut WorkerScope) {}

    fn boom(_scope: &mut WorkerScope) {
        panic!("boom");
    }

    fn reply_once(scope: &mut WorkerScope) {
        if let Some(message) = scope.recv() {
            scope.post(message);
        }
    }

    fn scope_pair(name: &'static str) -> (WorkerScope, Sender<Message>, Receiver<Message>, Arc<AtomicBool>) {
        let (to_worker, inbound) = mpsc::channel();
        let (outbound, from_worker) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(false));
        let scope = WorkerScope::new(name, inbound, outbound, flag.clone());
        (scope, to_worker, from_worker, flag)
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = EntryRegistry::new();
        registry.register(Entry::new("noop", noop)).unwrap();
        let err = registry.register(Entry::new("noop", boom)).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry(name) if name == "noop"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_names_sorted() {
        let registry = EntryRegistry::new()
            .with(Entry::new("zeta", noop))
            .unwrap()
            .with(Entry::new("alpha", noop))
            .unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_run_catches_panic() {
        let (mut scope, ..) = scope_pair("boom");
        let result = Entry::new("boom", boom).run(&mut scope);
        assert_eq!(result, Err("boom".to_string()));
    }

    #[test]
    fn test_scope_round_trip() {
        let (mut scope, to_worker, from_worker, _flag) = scope_pair("reply");
        to_worker.send(Message::from(5)).unwrap();
        Entry::new("reply", reply_once).run(&mut scope).unwrap();
        assert_eq!(from_worker.try_recv().unwrap(), Message::from(5));
    }

    #[test]
    fn test_scope_after_termination() {
        let (scope, to_worker, from_worker, flag) = scope_pair("noop");
        to_worker.send(Message::from(1)).unwrap();
        flag.store(true, Ordering::Release);
        assert!(scope.recv().is_none());
        assert!(!scope.post(2));
        assert!(from_worker.try_recv().is_err());
    }

    #[test]
    fn test_recv_returns_none_when_handle_dropped() {
        let (scope, to_worker, _from_worker, _flag) = scope_pair("noop");
        drop(to_worker);
        assert!(scope.recv().is_none());
        assert!(scope.recv_timeout(Duration::from_millis(10)).is_none());
    }
}
