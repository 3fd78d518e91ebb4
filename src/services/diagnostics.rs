//! Diagnostics emitted by the verification substrate.
//!
//! Progress, retries, handler failures and subscription lifecycle go only to
//! the [`DiagnosticSink`] bound to the scenario that owns the waiter or
//! watcher. Production code uses the tracing sink from
//! `infrastructure::logging`; tests record.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Something worth telling the owner of a waiter or watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A probe ran and the waiter keeps going.
    Progress {
        label: String,
        poll: u32,
        remaining: Duration,
    },
    /// A probe failed with an error the waiter will retry.
    TransientRetry {
        label: String,
        poll: u32,
        error: String,
    },
    /// A handler returned an error or panicked during fan-out.
    HandlerFailed { registration: String, error: String },
    SubscriptionOpened,
    /// The notification stream ended on its own, with the error that ended it.
    SubscriptionEnded { error: Option<String> },
    WatcherStopped { received: u64, handler_failures: u64 },
}

/// Receiver of [`Diagnostic`]s. Must not block.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record(&self, _diagnostic: Diagnostic) {}
}

/// Keeps every diagnostic in memory, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handler_failures(&self) -> usize {
        self.count(|d| matches!(d, Diagnostic::HandlerFailed { .. }))
    }

    pub fn transient_retries(&self) -> usize {
        self.count(|d| matches!(d, Diagnostic::TransientRetry { .. }))
    }

    fn count(&self, f: impl Fn(&Diagnostic) -> bool) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| f(d))
            .count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&self, diagnostic: Diagnostic) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts() {
        let sink = RecordingSink::new();
        sink.record(Diagnostic::SubscriptionOpened);
        sink.record(Diagnostic::HandlerFailed {
            registration: "scale-up".to_string(),
            error: "boom".to_string(),
        });
        sink.record(Diagnostic::TransientRetry {
            label: "nodes".to_string(),
            poll: 1,
            error: "timeout".to_string(),
        });

        assert_eq!(sink.records().len(), 3);
        assert_eq!(sink.handler_failures(), 1);
        assert_eq!(sink.transient_retries(), 1);
    }
}
