//! Error types for tether-core.

use thiserror::Error;

use crate::host::ContextId;

/// Result type for tether-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The host cannot run worker contexts at all.
    #[error("worker execution is not supported in this environment: {0}")]
    UnsupportedEnvironment(String),

    /// `create` was called on a handle that already owns a live context.
    #[error("worker handle is already active (context {context})")]
    AlreadyActive { context: ContextId },

    /// Operation requires a live context but the handle is empty.
    #[error("worker handle is not active")]
    NotActive,

    /// The host failed to start a context.
    #[error("failed to launch worker context: {0}")]
    Launch(String),

    /// No entry with this name is registered.
    #[error("unknown entry: {0}")]
    UnknownEntry(String),

    /// An entry with this name is already registered.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IPC communication error with a worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a short recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::UnsupportedEnvironment(_) => Some(
                "build the worker with `cargo build -p tether-worker` or set TETHER_WORKER_PATH",
            ),
            Self::AlreadyActive { .. } => {
                Some("call terminate() first, or use RecreatePolicy::Replace")
            }
            Self::NotActive => Some("call create() before sending or listening"),
            Self::UnknownEntry(_) => Some("run `tether-worker --list` to see the available entries"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_is_appended() {
        let rendered = Error::NotActive.with_hint();
        assert!(rendered.starts_with("worker handle is not active"));
        assert!(rendered.contains("hint: call create()"));
    }

    #[test]
    fn test_no_hint_for_codec_errors() {
        let err = Error::Serialization("bad".to_string());
        assert_eq!(err.with_hint(), "serialization error: bad");
    }
}
