// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! User-facing event log.
//!
//! Every entry is mirrored to `tracing`; listeners let a front end react to
//! urgent entries (e.g. by opening an error panel).

use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    /// The error's `source()` chain, outermost cause first.
    pub trace: Vec<String>,
    pub urgent: bool,
    pub source: Option<String>,
}

type Listener = Arc<dyn Fn(&LogEntry) + Send + Sync>;

#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<LogEntry>>,
    listeners: Mutex<Vec<Listener>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` for every entry logged from now on.
    pub fn on_log<F>(&self, listener: F)
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    pub fn log_error(&self, err: &(dyn Error + 'static), urgent: bool, source: Option<&str>) {
        let mut trace = Vec::new();
        let mut cause = err.source();
        while let Some(e) = cause {
            trace.push(e.to_string());
            cause = e.source();
        }
        let entry = LogEntry {
            message: err.to_string(),
            trace,
            urgent,
            source: source.map(str::to_string),
        };
        if urgent {
            error!(source = source.unwrap_or("-"), "{}", entry.message);
        } else {
            warn!(source = source.unwrap_or("-"), "{}", entry.message);
        }
        self.push(entry);
    }

    pub fn log_message(&self, message: impl Into<String>, source: Option<&str>) {
        let entry = LogEntry {
            message: message.into(),
            trace: Vec::new(),
            urgent: false,
            source: source.map(str::to_string),
        };
        info!(source = source.unwrap_or("-"), "{}", entry.message);
        self.push(entry);
    }

    fn push(&self, entry: LogEntry) {
        lock(&self.entries).push(entry.clone());

        // Listeners run without either lock held so they may log themselves.
        let listeners: Vec<Listener> = lock(&self.listeners).clone();
        for listener in listeners {
            listener(&entry);
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, ProtocolError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_error_trace() {
        let log = EventLog::new();
        let err = DeviceError::Protocol(ProtocolError::ShortRead {
            expected: 4,
            got: 0,
        });
        log.log_error(&err, false, Some("read_register"));
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Got 0 bytes, expected 4");
        assert!(!entries[0].urgent);
        assert_eq!(entries[0].source.as_deref(), Some("read_register"));
    }

    #[test]
    fn test_listeners_see_urgent_flag() {
        let log = Arc::new(EventLog::new());
        let urgent = Arc::new(AtomicUsize::new(0));
        let seen = urgent.clone();
        log.on_log(move |entry| {
            if entry.urgent {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        log.log_message("connected", None);
        log.log_error(&DeviceError::Killed, true, None);
        assert_eq!(urgent.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_listener_may_log() {
        let log = Arc::new(EventLog::new());
        let inner = Arc::downgrade(&log);
        log.on_log(move |entry| {
            if entry.urgent {
                if let Some(log) = inner.upgrade() {
                    log.log_message("handled", None);
                }
            }
        });
        log.log_error(&DeviceError::Killed, true, None);
        assert_eq!(log.len(), 2);
    }
}
