//! Diagnostic sink backed by `tracing`.

use crate::services::diagnostics::{Diagnostic, DiagnosticSink};

/// Emits every diagnostic as a tracing event tagged with the owning scenario.
#[derive(Debug, Clone)]
pub struct TracingSink {
    scenario: String,
}

impl TracingSink {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        let scenario = self.scenario.as_str();
        match diagnostic {
            Diagnostic::Progress {
                label,
                poll,
                remaining,
            } => {
                tracing::debug!(scenario, %label, poll, "[{}s remaining]", remaining.as_secs());
            }
            Diagnostic::TransientRetry { label, poll, error } => {
                tracing::warn!(scenario, %label, poll, %error, "Transient error, retrying");
            }
            Diagnostic::HandlerFailed {
                registration,
                error,
            } => {
                tracing::warn!(scenario, %registration, %error, "Handler failed");
            }
            Diagnostic::SubscriptionOpened => {
                tracing::info!(scenario, "Watching notifications");
            }
            Diagnostic::SubscriptionEnded { error: Some(error) } => {
                tracing::warn!(scenario, %error, "Notification stream failed");
            }
            Diagnostic::SubscriptionEnded { error: None } => {
                tracing::info!(scenario, "Notification stream ended");
            }
            Diagnostic::WatcherStopped {
                received,
                handler_failures,
            } => {
                tracing::info!(scenario, received, handler_failures, "Stopped watching notifications");
            }
        }
    }
}
