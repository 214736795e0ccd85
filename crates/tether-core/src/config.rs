//! Configuration for worker handles and hosts.
//!
//! Every setting has a default and can be overridden from the environment:
//!
//! | variable                    | setting                            |
//! |-----------------------------|------------------------------------|
//! | `TETHER_STRICT`             | `HandleConfig::empty_policy`       |
//! | `TETHER_RECREATE`           | `HandleConfig::recreate_policy`    |
//! | `TETHER_MAX_BATCH`          | `HandleConfig::max_batch`          |
//! | `TETHER_WORKER_PATH`        | `ProcessConfig::worker_path`       |
//! | `TETHER_MAX_MESSAGE_BYTES`  | `ProcessConfig::max_message_bytes` |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable pointing at the worker binary.
pub const WORKER_PATH_ENV: &str = "TETHER_WORKER_PATH";

const STRICT_ENV: &str = "TETHER_STRICT";
const RECREATE_ENV: &str = "TETHER_RECREATE";
const MAX_BATCH_ENV: &str = "TETHER_MAX_BATCH";
const MAX_MESSAGE_BYTES_ENV: &str = "TETHER_MAX_MESSAGE_BYTES";

/// Default cap on a single encoded message for process hosts (16 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Default cap on messages delivered by one dispatch turn.
pub const DEFAULT_MAX_BATCH: usize = 1024;

/// What `send` and `on_message` do while the handle has no context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPolicy {
    /// Drop the message (or keep the listener for the next `create`).
    #[default]
    Ignore,
    /// Fail with `Error::NotActive`.
    Reject,
}

/// What `create` does while the handle already owns a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecreatePolicy {
    /// Fail with `Error::AlreadyActive`.
    #[default]
    Reject,
    /// Terminate the live context, then create the new one.
    Replace,
}

/// Behaviour of a [`WorkerHandle`](crate::WorkerHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleConfig {
    /// What `send` and `on_message` do without a context.
    pub empty_policy: EmptyPolicy,
    /// What `create` does with a context already running.
    pub recreate_policy: RecreatePolicy,
    /// Upper bound on messages delivered per dispatch turn, so a context
    /// that posts without pause cannot hold the caller inside `dispatch`.
    pub max_batch: usize,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            empty_policy: EmptyPolicy::default(),
            recreate_policy: RecreatePolicy::default(),
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl HandleConfig {
    /// Defaults overridden by `TETHER_STRICT`, `TETHER_RECREATE` and `TETHER_MAX_BATCH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(STRICT_ENV)
            && is_truthy(&value)
        {
            config.empty_policy = EmptyPolicy::Reject;
        }

        if let Some(value) = lookup(RECREATE_ENV) {
            match value.trim().to_ascii_lowercase().as_str() {
                "replace" => config.recreate_policy = RecreatePolicy::Replace,
                "reject" => config.recreate_policy = RecreatePolicy::Reject,
                other => tracing::warn!("Ignoring unknown {} value: {}", RECREATE_ENV, other),
            }
        }

        if let Some(value) = lookup(MAX_BATCH_ENV) {
            match value.trim().parse::<usize>() {
                Ok(batch) if batch > 0 => config.max_batch = batch,
                _ => tracing::warn!("Ignoring invalid {} value: {}", MAX_BATCH_ENV, value),
            }
        }

        config
    }

    pub fn with_empty_policy(mut self, policy: EmptyPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    pub fn with_recreate_policy(mut self, policy: RecreatePolicy) -> Self {
        self.recreate_policy = policy;
        self
    }

    /// Cap messages per dispatch turn. Zero is treated as one.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }
}

/// Settings for [`ProcessHost`](crate::host::ProcessHost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Explicit worker binary. When set, no other location is searched.
    pub worker_path: Option<PathBuf>,
    /// Messages whose encoded payload exceeds this are dropped before sending.
    pub max_message_bytes: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ProcessConfig {
    /// Defaults overridden by `TETHER_WORKER_PATH` and `TETHER_MAX_MESSAGE_BYTES`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(WORKER_PATH_ENV)
            && !path.is_empty()
        {
            config.worker_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup(MAX_MESSAGE_BYTES_ENV) {
            match value.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.max_message_bytes = bytes,
                _ => tracing::warn!("Ignoring invalid {} value: {}", MAX_MESSAGE_BYTES_ENV, value),
            }
        }

        config
    }

    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_handle_defaults() {
        let config = HandleConfig::from_lookup(lookup(&[]));
        assert_eq!(config.empty_policy, EmptyPolicy::Ignore);
        assert_eq!(config.recreate_policy, RecreatePolicy::Reject);
        assert_eq!(config.max_batch, DEFAULT_MAX_BATCH);
    }

    #[test]
    fn test_handle_from_env_vars() {
        let config = HandleConfig::from_lookup(lookup(&[
            ("TETHER_STRICT", "yes"),
            ("TETHER_RECREATE", "Replace"),
            ("TETHER_MAX_BATCH", "64"),
        ]));
        assert_eq!(config.empty_policy, EmptyPolicy::Reject);
        assert_eq!(config.recreate_policy, RecreatePolicy::Replace);
        assert_eq!(config.max_batch, 64);
    }

    #[test]
    fn test_strict_requires_truthy_value() {
        let config = HandleConfig::from_lookup(lookup(&[("TETHER_STRICT", "0")]));
        assert_eq!(config.empty_policy, EmptyPolicy::Ignore);
    }

    #[test]
    fn test_zero_batch_is_clamped() {
        assert_eq!(HandleConfig::default().with_max_batch(0).max_batch, 1);
        let config = HandleConfig::from_lookup(lookup(&[("TETHER_MAX_BATCH", "0")]));
        assert_eq!(config.max_batch, DEFAULT_MAX_BATCH);
    }

    #[test]
    fn test_unknown_recreate_value_keeps_default() {
        let config = HandleConfig::from_lookup(lookup(&[("TETHER_RECREATE", "sometimes")]));
        assert_eq!(config.recreate_policy, RecreatePolicy::Reject);
    }

    #[test]
    fn test_process_from_env_vars() {
        let config = ProcessConfig::from_lookup(lookup(&[
            ("TETHER_WORKER_PATH", "/opt/tether/tether-worker"),
            ("TETHER_MAX_MESSAGE_BYTES", "1024"),
        ]));
        assert_eq!(config.worker_path, Some(PathBuf::from("/opt/tether/tether-worker")));
        assert_eq!(config.max_message_bytes, 1024);
    }

    #[test]
    fn test_empty_worker_path_ignored() {
        let config = ProcessConfig::from_lookup(lookup(&[("TETHER_WORKER_PATH", "")]));
        assert_eq!(config.worker_path, None);
    }

    #[test]
    fn test_process_invalid_size_ignored() {
        let config = ProcessConfig::from_lookup(lookup(&[("TETHER_MAX_MESSAGE_BYTES", "0")]));
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_handle_config_deserializes_partial() {
        let config: HandleConfig = serde_json::from_str(r#"{"empty_policy":"reject"}"#).unwrap();
        assert_eq!(config.empty_policy, EmptyPolicy::Reject);
        assert_eq!(config.recreate_policy, RecreatePolicy::Reject);
        assert_eq!(config.max_batch, DEFAULT_MAX_BATCH);
    }
}
