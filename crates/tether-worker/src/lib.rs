//! Built-in entries served by the `tether-worker` binary.
//!
//! Hosts refer to these by name when launching a context in a worker process.

use std::time::Duration;

use serde_json::json;
use tether_core::{Entry, EntryRegistry, Result, WorkerScope};

/// Replies with every message unchanged.
pub const ECHO: Entry = Entry::new("echo", echo);

/// Replies with `n * 2` for every integer `n`; ignores anything else,
/// including values whose double does not fit in an `i64`.
pub const DOUBLE: Entry = Entry::new("double", double);

/// Replies with `{"total": .., "count": ..}` after every number.
pub const SUM: Entry = Entry::new("sum", sum);

/// Burns CPU forever without reading its inbox. Only a hard kill stops it.
pub const SPIN: Entry = Entry::new("spin", spin);

/// Panics on the first message.
pub const PANIC: Entry = Entry::new("panic", panic_on_message);

/// Every built-in entry.
pub fn registry() -> Result<EntryRegistry> {
    EntryRegistry::new()
        .with(ECHO)?
        .with(DOUBLE)?
        .with(SUM)?
        .with(SPIN)?
        .with(PANIC)
}

fn echo(scope: &mut WorkerScope) {
    while let Some(message) = scope.recv() {
        if !scope.post(message) {
            break;
        }
    }
}

fn double(scope: &mut WorkerScope) {
    while let Some(message) = scope.recv() {
        let Some(n) = message.as_i64() else {
            continue;
        };
        match n.checked_mul(2) {
            Some(doubled) => {
                scope.post(doubled);
            }
            None => tracing::warn!("double: {} overflows, skipping", n),
        }
    }
}

fn sum(scope: &mut WorkerScope) {
    let mut total = 0.0;
    let mut count = 0u64;
    while let Some(message) = scope.recv() {
        let Some(n) = message.as_value().as_f64() else {
            tracing::debug!("sum: ignoring non-numeric message");
            continue;
        };
        total += n;
        count += 1;
        scope.post(json!({ "total": total, "count": count }));
    }
}

fn spin(_scope: &mut WorkerScope) {
    let mut x: u64 = 0;
    loop {
        x = std::hint::black_box(x.wrapping_add(1));
        if x % (1 << 30) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn panic_on_message(scope: &mut WorkerScope) {
    if let Some(message) = scope.recv() {
        panic!("panic entry received {}", message.as_value());
    }
}
