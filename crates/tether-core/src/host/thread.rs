//! In-process host: each context is a dedicated OS thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::entry::{Entry, WorkerScope};
use crate::error::{Error, Result};

use super::{ContextControl, ExecutionContext, WorkerHost};

/// Runs each entry on its own thread.
///
/// Threads cannot be killed from outside, so termination raises the scope's
/// termination flag and disconnects both queues. The thread is detached; an
/// entry that never checks its scope keeps running but can no longer
/// communicate. Use [`ProcessHost`](super::ProcessHost) when hard termination
/// matters.
#[derive(Debug, Clone, Default)]
pub struct ThreadHost {
    stack_size: Option<usize>,
}

impl ThreadHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size for context threads.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl WorkerHost for ThreadHost {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn probe(&self) -> Result<()> {
        if cfg!(all(target_family = "wasm", not(target_feature = "atomics"))) {
            return Err(Error::UnsupportedEnvironment(
                "this target has no thread support".to_string(),
            ));
        }
        Ok(())
    }

    fn launch(&self, entry: &Entry) -> Result<ExecutionContext> {
        let (to_context, inbound) = mpsc::channel();
        let (outbound, from_context) = mpsc::channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let entry = *entry;
        let mut scope = WorkerScope::new(entry.name(), inbound, outbound, terminated.clone());

        let mut builder = thread::Builder::new().name(format!("tether-{}", entry.name()));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let thread = builder
            .spawn(move || {
                if let Err(message) = entry.run(&mut scope) {
                    tracing::error!(entry = entry.name(), "Entry panicked: {}", message);
                }
            })
            .map_err(|e| {
                Error::Launch(format!("Failed to spawn thread for '{}': {}", entry.name(), e))
            })?;

        let control = ThreadControl {
            entry: entry.name(),
            terminated,
            thread: Some(thread),
        };

        Ok(ExecutionContext::new(
            entry.name(),
            to_context,
            from_context,
            Box::new(control),
        ))
    }
}

struct ThreadControl {
    entry: &'static str,
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ContextControl for ThreadControl {
    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                // Dropping the JoinHandle detaches the thread. It only stops once
                // the entry next reads its scope or returns.
                tracing::warn!(
                    entry = self.entry,
                    "Detaching worker thread that is still running; \
                     use ProcessHost to stop entries that never check their scope"
                );
            }
        }
    }

    fn is_running(&mut self) -> bool {
        match &self.thread {
            Some(thread) => !thread.is_finished(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::time::Duration;

    fn echo(scope: &mut WorkerScope) {
        while let Some(message) = scope.recv() {
            scope.post(message);
        }
    }

    fn quit_immediately(_scope: &mut WorkerScope) {}

    #[test]
    fn test_probe_supported() {
        assert!(ThreadHost::new().probe().is_ok());
    }

    #[test]
    fn test_launch_and_echo() {
        let context = ThreadHost::new().launch(&Entry::new("echo", echo)).unwrap();
        assert_eq!(context.entry_name(), "echo");
        assert!(context.post(Message::from("ping")));

        let reply = context.inbound().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reply, Message::from("ping"));
        context.terminate();
    }

    #[test]
    fn test_terminate_detaches_running_thread() {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let thread = {
            let stop = stop.clone();
            let ticks = ticks.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let mut control = ThreadControl {
            entry: "stubborn",
            terminated: Arc::new(AtomicBool::new(false)),
            thread: Some(thread),
        };
        assert!(control.is_running());

        control.terminate();
        assert!(control.terminated.load(Ordering::Acquire));
        assert!(!control.is_running());

        // The detached thread keeps going until it stops by itself.
        let before = ticks.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::Relaxed) > before);

        stop.store(true, Ordering::Release);
        control.terminate();
    }

    #[test]
    fn test_finished_entry_is_not_running() {
        let mut context = ThreadHost::new()
            .with_stack_size(256 * 1024)
            .launch(&Entry::new("quit", quit_immediately))
            .unwrap();

        // Finishing drops the scope, which disconnects the inbound queue.
        assert!(context.inbound().recv_timeout(Duration::from_secs(5)).is_err());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while context.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!context.is_running());
        context.terminate();
    }
}
