//! Worker-side loop for worker binaries.
//!
//! A worker process reads [`HostCommand`] frames from stdin and writes
//! [`WorkerEvent`] frames to stdout. All stdout writes go through a single
//! writer thread so that frames never interleave. Logging must therefore go
//! to stderr.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use crate::entry::{EntryRegistry, WorkerScope};
use crate::error::{Error, Result};
use crate::message::Message;

use super::protocol::{HostCommand, WorkerEvent, read_message, write_message};

/// Serve the host over this process's stdin and stdout until it shuts us down
/// or closes stdin.
pub fn serve(registry: &EntryRegistry) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_io(registry, BufReader::new(stdin.lock()), BufWriter::new(stdout))
}

/// Serve over arbitrary streams. `serve` is this with stdin/stdout.
pub fn serve_io<R, W>(registry: &EntryRegistry, mut reader: R, writer: W) -> Result<()>
where
    R: Read,
    W: Write + Send + 'static,
{
    let (events, event_rx) = mpsc::channel::<WorkerEvent>();
    let writer_thread = thread::Builder::new()
        .name("tether-writer".to_string())
        .spawn(move || {
            let mut writer = writer;
            for event in event_rx {
                let last = event == WorkerEvent::Exited;
                if let Err(e) = write_message(&mut writer, &event) {
                    tracing::debug!("Host stream closed: {}", e);
                    break;
                }
                // Entry threads may outlive the loop; nothing is sent after Exited.
                if last {
                    break;
                }
            }
        })?;

    let mut session = Session {
        registry,
        events: events.clone(),
        running: None,
    };

    loop {
        let command = match read_message::<_, HostCommand>(&mut reader) {
            Ok(command) => command,
            Err(e) => {
                // End of input means the host went away.
                tracing::debug!("Stopping worker loop: {}", e);
                break;
            }
        };

        match command {
            HostCommand::Ping => session.emit(WorkerEvent::Pong),
            HostCommand::Start { entry } => session.start(&entry),
            HostCommand::Deliver { payload } => session.deliver(&payload),
            HostCommand::Shutdown => {
                tracing::debug!("Shutdown requested");
                break;
            }
        }
    }

    session.stop();
    session.emit(WorkerEvent::Exited);
    drop(session);
    drop(events);

    writer_thread
        .join()
        .map_err(|_| Error::Ipc("Writer thread panicked".to_string()))?;
    Ok(())
}

struct Running {
    entry: &'static str,
    inbound: Sender<Message>,
    terminated: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

struct Session<'r> {
    registry: &'r EntryRegistry,
    events: Sender<WorkerEvent>,
    running: Option<Running>,
}

impl Session<'_> {
    fn emit(&self, event: WorkerEvent) {
        // Fails only once the writer thread stopped, at which point nobody can hear us.
        let _ = self.events.send(event);
    }

    fn start(&mut self, name: &str) {
        if let Some(running) = &self.running {
            self.emit(WorkerEvent::Error {
                message: format!("entry '{}' is already running", running.entry),
            });
            return;
        }

        let Some(entry) = self.registry.get(name).copied() else {
            tracing::warn!("Host requested unknown entry '{}'", name);
            self.emit(WorkerEvent::Error {
                message: Error::UnknownEntry(name.to_string()).to_string(),
            });
            return;
        };

        let (inbound, inbound_rx) = mpsc::channel();
        let (outbound, outbound_rx) = mpsc::channel::<Message>();
        let terminated = Arc::new(AtomicBool::new(false));

        // Started must reach the host before anything the entry posts.
        self.emit(WorkerEvent::Started { entry: entry.name().to_string() });

        let forward_events = self.events.clone();
        let forwarder = thread::spawn(move || {
            for message in outbound_rx {
                let event = match message.to_bytes() {
                    Ok(payload) => WorkerEvent::Message { payload },
                    Err(e) => WorkerEvent::Error { message: e.to_string() },
                };
                if forward_events.send(event).is_err() {
                    break;
                }
            }
        });

        let body_events = self.events.clone();
        let mut scope = WorkerScope::new(entry.name(), inbound_rx, outbound, terminated.clone());
        let body = thread::Builder::new()
            .name(format!("tether-{}", entry.name()))
            .spawn(move || {
                tracing::debug!(entry = entry.name(), "Entry started");
                if let Err(message) = entry.run(&mut scope) {
                    tracing::error!(entry = entry.name(), "Entry panicked: {}", message);
                    let _ = body_events.send(WorkerEvent::Panic { message });
                }
                tracing::debug!(entry = entry.name(), "Entry finished");
            });

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                self.emit(WorkerEvent::Error {
                    message: format!("Failed to start entry thread: {}", e),
                });
                return;
            }
        };

        self.running = Some(Running {
            entry: entry.name(),
            inbound,
            terminated,
            threads: vec![body, forwarder],
        });
    }

    fn deliver(&self, payload: &[u8]) {
        let Some(running) = &self.running else {
            self.emit(WorkerEvent::Error {
                message: "no entry is running".to_string(),
            });
            return;
        };

        match Message::from_bytes(payload) {
            Ok(message) => {
                if running.inbound.send(message).is_err() {
                    tracing::debug!(entry = running.entry, "Entry no longer receiving");
                }
            }
            Err(e) => self.emit(WorkerEvent::Error { message: e.to_string() }),
        }
    }

    /// Signal the entry to stop and wait for it if it cooperates.
    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.terminated.store(true, Ordering::Release);
        drop(running.inbound);

        for thread in running.threads {
            // An entry that never checks for termination would block us here
            // forever; such entries end with the process instead.
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}
