//! Out-of-process host: each context is a `tether-worker` process.
//!
//! The parent talks to the worker over the frame protocol in
//! [`crate::ipc::protocol`]. Termination kills the process, so even an entry
//! stuck in a loop is stopped.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::config::{ProcessConfig, WORKER_PATH_ENV};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::ipc::{HostCommand, WorkerEvent, read_message, write_message};
use crate::message::Message;

use super::{ContextControl, ExecutionContext, WorkerHost};

const WORKER_NAME: &str = if cfg!(windows) { "tether-worker.exe" } else { "tether-worker" };

/// Runs each entry in a separate worker process.
#[derive(Debug, Clone, Default)]
pub struct ProcessHost {
    config: ProcessConfig,
}

impl ProcessHost {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    /// Host configured from the environment (see [`ProcessConfig::from_env`]).
    pub fn from_env() -> Self {
        Self::new(ProcessConfig::from_env())
    }

    /// Host that always uses the given worker binary.
    pub fn with_worker_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ProcessConfig::default().with_worker_path(path))
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Find the tether-worker binary path.
    ///
    /// An explicit `worker_path` is used as is. Otherwise looks in order at:
    /// 1. `TETHER_WORKER_PATH` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    /// 4. The workspace `target/debug` or `target/release` directory
    pub fn find_worker_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.worker_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(Error::UnsupportedEnvironment(format!(
                "worker binary not found at '{}'",
                path.display()
            )));
        }

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Ok(path);
            }
        }

        if let Some(path) = std::env::current_exe()
            .ok()
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(WORKER_NAME))
            .filter(|path| path.is_file())
        {
            return Ok(path);
        }

        if let Ok(path) = which::which(WORKER_NAME) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in &["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(WORKER_NAME);
                if path.is_file() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::UnsupportedEnvironment(format!(
            "could not find {} binary. Set {} or ensure it's in PATH",
            WORKER_NAME, WORKER_PATH_ENV
        )))
    }
}

impl WorkerHost for ProcessHost {
    fn name(&self) -> &'static str {
        "process"
    }

    fn probe(&self) -> Result<()> {
        self.find_worker_binary().map(|_| ())
    }

    fn launch(&self, entry: &Entry) -> Result<ExecutionContext> {
        let worker_path = self.find_worker_binary()?;

        let mut child = Command::new(&worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .spawn()
            .map_err(|e| {
                Error::Launch(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let pipes = child
            .stdin
            .take()
            .zip(child.stdout.take())
            .ok_or_else(|| Error::Launch("Failed to get worker stdio".to_string()));

        let mut control = ProcessControl { child, killed: false };
        let (stdin, stdout) = pipes?;
        let mut stdin = BufWriter::new(stdin);
        let mut stdout = BufReader::new(stdout);

        // Any failure from here on drops `control`, which kills the child.
        handshake(&mut stdin, &mut stdout, entry.name())?;
        tracing::debug!(entry = entry.name(), pid = control.child.id(), "Worker process started");

        let (to_context, outbound_rx) = mpsc::channel();
        let (inbound_tx, from_context) = mpsc::channel();

        spawn_writer(stdin, outbound_rx, self.config.max_message_bytes, entry.name())?;
        spawn_reader(stdout, inbound_tx, entry.name())?;

        Ok(ExecutionContext::new(
            entry.name(),
            to_context,
            from_context,
            Box::new(control),
        ))
    }
}

/// Verify the worker is alive, then start the entry.
fn handshake(
    stdin: &mut BufWriter<ChildStdin>,
    stdout: &mut BufReader<ChildStdout>,
    entry: &str,
) -> Result<()> {
    write_message(stdin, &HostCommand::Ping)?;
    match read_message::<_, WorkerEvent>(stdout)? {
        WorkerEvent::Pong => {}
        other => {
            return Err(Error::Launch(format!(
                "Unexpected response from worker: {:?}",
                other
            )));
        }
    }

    write_message(stdin, &HostCommand::Start { entry: entry.to_string() })?;
    match read_message::<_, WorkerEvent>(stdout)? {
        WorkerEvent::Started { .. } => Ok(()),
        WorkerEvent::Error { message } => Err(Error::Launch(message)),
        other => Err(Error::Launch(format!(
            "Unexpected response when starting entry: {:?}",
            other
        ))),
    }
}

/// Drain queued messages into `Deliver` frames.
fn spawn_writer(
    mut stdin: BufWriter<ChildStdin>,
    messages: Receiver<Message>,
    max_message_bytes: usize,
    entry: &'static str,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("tether-{}-tx", entry))
        .spawn(move || {
            for message in messages {
                let payload = match message.to_bytes() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(entry, "Dropping message: {}", e);
                        continue;
                    }
                };
                if payload.len() > max_message_bytes {
                    tracing::warn!(
                        entry,
                        "Dropping message of {} bytes (limit {})",
                        payload.len(),
                        max_message_bytes
                    );
                    continue;
                }
                if let Err(e) = write_message(&mut stdin, &HostCommand::Deliver { payload }) {
                    tracing::debug!(entry, "Worker stopped accepting messages: {}", e);
                    return;
                }
            }
            // Handle side is gone; ask the worker to exit in case it is still alive.
            let _ = write_message(&mut stdin, &HostCommand::Shutdown);
        })
        .map(|_| ())
        .map_err(|e| Error::Launch(format!("Failed to spawn writer thread: {}", e)))
}

/// Turn `Message` frames into inbound messages; log everything else.
fn spawn_reader(
    mut stdout: BufReader<ChildStdout>,
    inbound: Sender<Message>,
    entry: &'static str,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("tether-{}-rx", entry))
        .spawn(move || {
            loop {
                let event = match read_message::<_, WorkerEvent>(&mut stdout) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!(entry, "Worker output closed: {}", e);
                        return;
                    }
                };

                match event {
                    WorkerEvent::Message { payload } => match Message::from_bytes(&payload) {
                        Ok(message) => {
                            if inbound.send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => tracing::warn!(entry, "Discarding undecodable message: {}", e),
                    },
                    WorkerEvent::Panic { message } => {
                        tracing::error!(entry, "Entry panicked in worker: {}", message);
                    }
                    WorkerEvent::Error { message } => {
                        tracing::warn!(entry, "Worker reported an error: {}", message);
                    }
                    WorkerEvent::Exited => {
                        tracing::debug!(entry, "Worker exited");
                        return;
                    }
                    WorkerEvent::Pong | WorkerEvent::Started { .. } => {}
                }
            }
        })
        .map(|_| ())
        .map_err(|e| Error::Launch(format!("Failed to spawn reader thread: {}", e)))
}

struct ProcessControl {
    child: Child,
    killed: bool,
}

impl ContextControl for ProcessControl {
    fn terminate(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;

        if let Err(e) = self.child.kill() {
            // InvalidInput means the process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();
    }

    fn is_running(&mut self) -> bool {
        if self.killed {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ProcessControl {
    fn drop(&mut self) {
        // Ensure worker is killed when the control is dropped
        self.terminate();
    }
}
