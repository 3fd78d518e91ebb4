//! Poll-until-converged waiter.
//!
//! A [`ConvergenceWaiter`] is a stateless policy: polling interval, hard
//! deadline and a classifier deciding which probe errors are transient.
//! `eventually` and `consistently` are two modes over the same polling loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};

use super::diagnostics::{Diagnostic, DiagnosticSink, NullSink};
use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::WaitConfig;

/// Decides whether a probe error should be retried.
pub type ErrorClassifier = Arc<dyn Fn(&VerifyError) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Eventually,
    Consistently,
}

#[derive(Clone)]
pub struct ConvergenceWaiter {
    interval: Duration,
    timeout: Duration,
    classifier: ErrorClassifier,
    diagnostics: Arc<dyn DiagnosticSink>,
    label: String,
}

impl ConvergenceWaiter {
    /// Create a waiter polling every `interval` for at most `timeout`.
    ///
    /// A zero interval is raised to one millisecond.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            timeout,
            classifier: Arc::new(VerifyError::is_transient),
            diagnostics: Arc::new(NullSink),
            label: "condition".to_string(),
        }
    }

    /// Waiter using the configured poll interval.
    pub fn from_config(waits: &WaitConfig, timeout: Duration) -> Self {
        Self::new(waits.poll_interval(), timeout)
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&VerifyError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll until `probe` returns `Ok(true)`.
    ///
    /// Transient errors are reported and retried; the first fatal error is
    /// returned as is. Running out of time yields `DeadlineExceeded` with the
    /// last transient error seen.
    pub async fn eventually<F, Fut>(&self, mut probe: F) -> VerifyResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VerifyResult<bool>>,
    {
        self.eventually_value(&mut probe, |done| *done).await.map(|_| ())
    }

    /// Poll until `probe` yields a value satisfying `check`, and return it.
    pub async fn eventually_value<T, F, Fut, C>(&self, mut probe: F, check: C) -> VerifyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VerifyResult<T>>,
        C: Fn(&T) -> bool,
    {
        let outcome = self
            .poll(Mode::Eventually, || {
                let fut = probe();
                let check = &check;
                async move { fut.await.map(|value| check(&value).then_some(value)) }
            })
            .await?;

        outcome.ok_or_else(|| VerifyError::fatal("eventually finished without a value"))
    }

    /// Retry `probe` until it succeeds at all, returning its value.
    pub async fn fetch<T, F, Fut>(&self, mut probe: F) -> VerifyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VerifyResult<T>>,
    {
        self.eventually_value(&mut probe, |_| true).await
    }

    /// Require `probe` to return `Ok(true)` on every poll for the whole
    /// timeout window.
    ///
    /// The first `Ok(false)` fails with `ConsistencyViolated`. Any error
    /// also ends the window: transient errors become the violation's cause,
    /// fatal errors are returned unchanged.
    pub async fn consistently<F, Fut>(&self, mut probe: F) -> VerifyResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VerifyResult<bool>>,
    {
        self.poll(Mode::Consistently, || {
            let fut = probe();
            async move { fut.await.map(|held| held.then_some(())) }
        })
        .await
        .map(|_| ())
    }

    async fn poll<T, F, Fut>(&self, mode: Mode, mut probe: F) -> VerifyResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VerifyResult<Option<T>>>,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls: u32 = 0;
        let mut last_error: Option<VerifyError> = None;

        loop {
            // The first tick completes immediately.
            if timeout_at(deadline, ticker.tick()).await.is_err() {
                return self.window_closed(mode, started, polls, last_error.take());
            }
            polls += 1;

            let result = match timeout_at(deadline, probe()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(label = %self.label, poll = polls, "Probe still running at deadline");
                    return self.window_closed(mode, started, polls, last_error.take());
                }
            };

            match (mode, result) {
                (Mode::Eventually, Ok(Some(value))) => {
                    tracing::debug!(label = %self.label, polls, elapsed = ?started.elapsed(), "Condition met");
                    return Ok(Some(value));
                }
                (Mode::Eventually, Ok(None)) => {}
                (Mode::Consistently, Ok(Some(_))) => {}
                (Mode::Consistently, Ok(None)) => {
                    return Err(VerifyError::ConsistencyViolated {
                        poll: polls,
                        elapsed: started.elapsed(),
                        cause: None,
                    });
                }
                (_, Err(error)) if !(self.classifier)(&error) => return Err(error),
                (Mode::Eventually, Err(error)) => {
                    self.diagnostics.record(Diagnostic::TransientRetry {
                        label: self.label.clone(),
                        poll: polls,
                        error: error.to_string(),
                    });
                    last_error = Some(error);
                }
                (Mode::Consistently, Err(error)) => {
                    return Err(VerifyError::ConsistencyViolated {
                        poll: polls,
                        elapsed: started.elapsed(),
                        cause: Some(Box::new(error)),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return self.window_closed(mode, started, polls, last_error.take());
            }
            let remaining = deadline - now;
            self.diagnostics.record(Diagnostic::Progress {
                label: self.label.clone(),
                poll: polls,
                remaining,
            });
        }
    }

    fn window_closed<T>(
        &self,
        mode: Mode,
        started: Instant,
        polls: u32,
        last_error: Option<VerifyError>,
    ) -> VerifyResult<Option<T>> {
        match mode {
            Mode::Eventually => {
                let waited = started.elapsed();
                tracing::debug!(label = %self.label, polls, ?waited, "Deadline exceeded");
                Err(VerifyError::DeadlineExceeded {
                    waited,
                    last_error: last_error.map(Box::new),
                })
            }
            Mode::Consistently => Ok(None),
        }
    }
}

impl std::fmt::Debug for ConvergenceWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergenceWaiter")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::domain::errors::ClientError;
    use crate::services::diagnostics::RecordingSink;

    fn waiter(interval_ms: u64, timeout_ms: u64) -> ConvergenceWaiter {
        ConvergenceWaiter::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_retries_transient_errors() {
        let sink = Arc::new(RecordingSink::new());
        let calls = AtomicU32::new(0);
        let result = waiter(100, 1_000)
            .with_diagnostics(sink.clone())
            .eventually(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(VerifyError::Client(ClientError::Timeout)),
                        1 => Err(VerifyError::transient("stale read")),
                        _ => Ok(true),
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.transient_retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_aborts_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let err = waiter(100, 1_000)
            .eventually(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VerifyError::fatal("malformed reference")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::FatalConfiguration(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_carries_last_error() {
        let err = waiter(100, 300)
            .eventually(|| async { Err(VerifyError::transient("list nodes timed out")) })
            .await
            .unwrap_err();

        match err {
            VerifyError::DeadlineExceeded { last_error, .. } => {
                assert!(last_error.unwrap().to_string().contains("list nodes timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier() {
        let calls = AtomicU32::new(0);
        let err = waiter(100, 1_000)
            .with_classifier(|_| false)
            .eventually(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(VerifyError::transient("flaky")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::TransientRead(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_value_returns_value() {
        let calls = AtomicU32::new(0);
        let value = waiter(100, 1_000)
            .eventually_value(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(n) }
                },
                |n| *n >= 2,
            )
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistently_transient_error_violates() {
        let calls = AtomicU32::new(0);
        let err = waiter(100, 1_000)
            .consistently(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(true)
                    } else {
                        Err(VerifyError::transient("read timeout"))
                    }
                }
            })
            .await
            .unwrap_err();

        match err {
            VerifyError::ConsistencyViolated { poll, cause, .. } => {
                assert_eq!(poll, 2);
                assert!(cause.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistently_succeeds_over_window() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        waiter(100, 500)
            .consistently(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(calls.load(Ordering::SeqCst) >= 5);
    }
}
