//! Domain errors for convergence verification.
//!
//! Errors are split by who may see them: `ClientError` and
//! `SubscriptionError` come out of the platform ports, `VerifyError` is what
//! waiters, watchers and probes hand back to the scenario layer.

use std::time::Duration;

use thiserror::Error;

use super::models::ObjectKind;

fn last_error_suffix(last_error: &Option<Box<VerifyError>>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

/// Errors returned by a `ClusterClient` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("expected a {expected} but got a {found}")]
    UnexpectedKind { expected: ObjectKind, found: ObjectKind },

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },
}

impl ClientError {
    /// Returns true if retrying the same request can succeed.
    ///
    /// A missing object is transient: the platform may simply not have
    /// created it yet. Permission and schema problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::Conflict(_) | Self::Connection(_) | Self::Timeout => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Forbidden(_) | Self::Invalid(_) | Self::UnexpectedKind { .. } => false,
        }
    }
}

/// Failure to open or sustain the notification stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("failed to open notification stream: {0}")]
    Open(String),

    #[error("notification stream failed: {0}")]
    Stream(String),
}

/// Errors surfaced by the verification substrate.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    /// A read failed or returned inconsistent-but-plausible data.
    #[error("transient read error: {0}")]
    TransientRead(String),

    /// Malformed reference or contract violation; retrying cannot help.
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("condition not met within {waited:?}{}", last_error_suffix(.last_error))]
    DeadlineExceeded {
        waited: Duration,
        last_error: Option<Box<VerifyError>>,
    },

    #[error("condition stopped holding on poll {poll} after {elapsed:?}{}", last_error_suffix(.cause))]
    ConsistencyViolated {
        poll: u32,
        elapsed: Duration,
        cause: Option<Box<VerifyError>>,
    },

    #[error("event watcher is already running")]
    AlreadyRunning,

    #[error("event watcher has been stopped and cannot be restarted")]
    WatcherStopped,

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl VerifyError {
    /// Returns true if a convergence waiter should keep polling after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientRead(_) => true,
            Self::Client(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Shorthand for building a `FatalConfiguration` error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalConfiguration(message.into())
    }

    /// Shorthand for building a `TransientRead` error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientRead(message.into())
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
