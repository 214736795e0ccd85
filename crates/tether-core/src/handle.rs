//! The caller-owned handle to one worker context.

use std::fmt;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use crate::config::{EmptyPolicy, HandleConfig, RecreatePolicy};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::host::{ContextId, ExecutionContext, ThreadHost, WorkerHost};
use crate::message::Message;

type Listener = Box<dyn FnMut(&Message)>;

/// Lifecycle state of a [`WorkerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No context.
    Empty,
    /// Owns a live context.
    Active,
}

/// Exclusive owner of at most one worker context.
///
/// Messages from the context are queued by the host and delivered to the
/// listener only during a dispatch turn ([`dispatch`](Self::dispatch) or
/// [`dispatch_timeout`](Self::dispatch_timeout)), on the caller's own thread.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_core::{Entry, WorkerHandle, WorkerScope};
///
/// fn double(scope: &mut WorkerScope) {
///     while let Some(message) = scope.recv() {
///         if let Some(n) = message.as_i64() {
///             scope.post(n * 2);
///         }
///     }
/// }
///
/// let mut handle = WorkerHandle::threaded().unwrap();
/// handle.create(Entry::new("double", double)).unwrap();
/// handle.send(21).unwrap();
/// handle.dispatch_timeout(Duration::from_secs(5));
/// assert_eq!(handle.last_received().and_then(|m| m.as_i64()), Some(42));
/// handle.terminate();
/// ```
pub struct WorkerHandle<H: WorkerHost = ThreadHost> {
    host: H,
    config: HandleConfig,
    context: Option<ExecutionContext>,
    last_received: Option<Message>,
    listener: Option<Listener>,
}

impl WorkerHandle<ThreadHost> {
    /// Handle backed by a [`ThreadHost`], configured from the environment.
    pub fn threaded() -> Result<Self> {
        Self::with_config(ThreadHost::new(), HandleConfig::from_env())
    }
}

impl<H: WorkerHost> WorkerHandle<H> {
    /// Create an empty handle with the default configuration.
    ///
    /// Fails with `Error::UnsupportedEnvironment` if the host cannot run
    /// contexts. The check happens here, once.
    pub fn new(host: H) -> Result<Self> {
        Self::with_config(host, HandleConfig::default())
    }

    /// Create an empty handle with an explicit configuration.
    ///
    /// Performs the same capability check as [`new`](Self::new).
    pub fn with_config(host: H, config: HandleConfig) -> Result<Self> {
        host.probe()?;
        tracing::debug!(host = host.name(), "Worker handle constructed");

        Ok(Self {
            host,
            config,
            context: None,
            last_received: None,
            listener: None,
        })
    }

    /// Start `entry` in a new context and make the handle active.
    ///
    /// On an active handle this fails with `Error::AlreadyActive` under
    /// [`RecreatePolicy::Reject`]. Under [`RecreatePolicy::Replace`] it runs a
    /// full [`terminate`](Self::terminate) first, so the old context's last
    /// message and listener do not carry over.
    pub fn create(&mut self, entry: Entry) -> Result<()> {
        if let Some(context) = &self.context {
            match self.config.recreate_policy {
                RecreatePolicy::Reject => {
                    return Err(Error::AlreadyActive { context: context.id() });
                }
                RecreatePolicy::Replace => {
                    tracing::debug!(context = %context.id(), "Replacing active context");
                    self.terminate();
                }
            }
        }

        let context = self.host.launch(&entry)?;
        tracing::debug!(
            host = self.host.name(),
            entry = entry.name(),
            context = %context.id(),
            "Context created"
        );
        self.context = Some(context);
        Ok(())
    }

    /// Queue a message for the context. Never blocks.
    ///
    /// Delivery is fire-and-forget: a context that already stopped drops it.
    /// While empty, the message is dropped ([`EmptyPolicy::Ignore`]) or
    /// rejected with `Error::NotActive` ([`EmptyPolicy::Reject`]).
    pub fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        let Some(context) = &self.context else {
            return self.on_empty("send");
        };

        if !context.post(message.into()) {
            tracing::debug!(context = %context.id(), "Context no longer accepts messages");
        }
        Ok(())
    }

    /// Send several messages in order.
    pub fn send_all<I>(&mut self, messages: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        for message in messages {
            self.send(message)?;
        }
        Ok(())
    }

    /// Register the listener, replacing any previous one.
    ///
    /// A listener registered while empty is kept and used by the next
    /// context, unless the handle is configured with [`EmptyPolicy::Reject`].
    pub fn on_message<F>(&mut self, listener: F) -> Result<()>
    where
        F: FnMut(&Message) + 'static,
    {
        if self.context.is_none() && self.config.empty_policy == EmptyPolicy::Reject {
            return Err(Error::NotActive);
        }
        self.listener = Some(Box::new(listener));
        Ok(())
    }

    /// Remove the listener. Later messages only update `last_received`.
    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Deliver messages already queued by the context, without waiting.
    ///
    /// At most `HandleConfig::max_batch` messages are delivered per call;
    /// the rest stay queued for the next turn. Returns the number delivered.
    pub fn dispatch(&mut self) -> usize {
        self.dispatch_batch(self.config.max_batch)
    }

    /// Wait up to `timeout` for a message, then deliver it and whatever else
    /// is queued, within the same `max_batch` bound as [`dispatch`](Self::dispatch).
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        if !self.dispatch_one(Some(timeout)) {
            return 0;
        }
        1 + self.dispatch_batch(self.config.max_batch.saturating_sub(1))
    }

    fn dispatch_batch(&mut self, limit: usize) -> usize {
        let mut delivered = 0;
        while delivered < limit && self.dispatch_one(None) {
            delivered += 1;
        }
        delivered
    }

    fn dispatch_one(&mut self, wait: Option<Duration>) -> bool {
        let Some(context) = &self.context else {
            return false;
        };

        let received = match wait {
            None => context.inbound().try_recv().ok(),
            Some(timeout) => match context.inbound().recv_timeout(timeout) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        };

        let Some(message) = received else {
            return false;
        };

        if let Some(listener) = self.listener.as_mut() {
            listener(&message);
        }
        self.last_received = Some(message);
        true
    }

    /// Stop the context and return to empty. Idempotent.
    ///
    /// Termination is abrupt: messages in flight in either direction are lost.
    pub fn terminate(&mut self) {
        self.terminate_context();
        self.last_received = None;
        self.listener = None;
    }

    fn terminate_context(&mut self) {
        if let Some(context) = self.context.take() {
            let id = context.id();
            context.terminate();
            tracing::debug!(context = %id, "Context terminated");
        }
    }

    fn on_empty(&self, operation: &str) -> Result<()> {
        match self.config.empty_policy {
            EmptyPolicy::Ignore => {
                tracing::debug!("Ignoring {} on empty worker handle", operation);
                Ok(())
            }
            EmptyPolicy::Reject => Err(Error::NotActive),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        if self.context.is_some() {
            HandleState::Active
        } else {
            HandleState::Empty
        }
    }

    /// Whether the handle owns a live context.
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }

    /// Identifier of the live context, `None` when empty.
    pub fn context_id(&self) -> Option<ContextId> {
        self.context.as_ref().map(ExecutionContext::id)
    }

    /// Name of the entry running in the live context.
    pub fn entry_name(&self) -> Option<&'static str> {
        self.context.as_ref().map(ExecutionContext::entry_name)
    }

    /// Whether the context is still executing. `false` when empty.
    pub fn is_running(&mut self) -> bool {
        self.context.as_mut().is_some_and(ExecutionContext::is_running)
    }

    /// Most recent message delivered by a dispatch turn.
    pub fn last_received(&self) -> Option<&Message> {
        self.last_received.as_ref()
    }

    /// Whether a listener is registered (possibly waiting for `create`).
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Configuration the handle was constructed with.
    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// The host that launches this handle's contexts.
    pub fn host(&self) -> &H {
        &self.host
    }
}

impl<H: WorkerHost> Drop for WorkerHandle<H> {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl<H: WorkerHost> fmt::Debug for WorkerHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("host", &self.host.name())
            .field("config", &self.config)
            .field("context", &self.context)
            .field("last_received", &self.last_received)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
