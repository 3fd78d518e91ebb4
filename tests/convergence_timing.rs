//! Convergence waiter timing, run on a paused clock so elapsed times are exact.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use settle::services::{ConvergenceWaiter, RecordingSink};
use settle::{ClientError, VerifyError};
use tokio::time::Instant;

fn waiter(interval_ms: u64, timeout_ms: u64) -> ConvergenceWaiter {
    ConvergenceWaiter::new(
        Duration::from_millis(interval_ms),
        Duration::from_millis(timeout_ms),
    )
}

#[tokio::test(start_paused = true)]
async fn test_eventually_returns_on_third_poll() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    waiter(100, 5_000)
        .eventually(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n == 3)
        })
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_eventually_gives_up_at_deadline() {
    let started = Instant::now();

    let err = waiter(100, 500)
        .eventually(|| async { Ok(false) })
        .await
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(matches!(err, VerifyError::DeadlineExceeded { last_error: None, .. }));
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_is_cut_off_at_deadline() {
    let started = Instant::now();

    let err = waiter(100, 500)
        .eventually(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::DeadlineExceeded { .. }));
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_and_reported() {
    let sink = Arc::new(RecordingSink::new());
    let calls = AtomicU32::new(0);

    waiter(50, 2_000)
        .with_label("machines listed")
        .with_diagnostics(sink.clone())
        .eventually(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClientError::Timeout.into())
            } else {
                Ok(true)
            }
        })
        .await
        .unwrap();

    assert_eq!(sink.transient_retries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_keeps_last_transient_error() {
    let err = waiter(50, 300)
        .eventually(|| async { Err(VerifyError::transient("list nodes: connection reset")) })
        .await
        .unwrap_err();

    match err {
        VerifyError::DeadlineExceeded { last_error: Some(last), .. } => {
            assert!(last.to_string().contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_aborts_immediately() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let err = waiter(100, 5_000)
        .eventually(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VerifyError::fatal("malformed machine reference"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::FatalConfiguration(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_consistently_fails_right_after_second_poll() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let err = waiter(100, 1_000)
        .consistently(|| async { Ok(calls.fetch_add(1, Ordering::SeqCst) == 0) })
        .await
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(matches!(err, VerifyError::ConsistencyViolated { poll: 2, cause: None, .. }));
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_consistently_holds_for_whole_window() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    waiter(100, 1_000)
        .consistently(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1_000));
    let polls = calls.load(Ordering::SeqCst);
    assert!((9..=11).contains(&polls), "{polls} polls");
}

#[tokio::test(start_paused = true)]
async fn test_consistently_wraps_transient_errors() {
    let err = waiter(100, 1_000)
        .consistently(|| async { Err(VerifyError::transient("read timed out")) })
        .await
        .unwrap_err();

    match err {
        VerifyError::ConsistencyViolated { poll: 1, cause: Some(cause), .. } => {
            assert!(cause.is_transient());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fetch_returns_first_value() {
    let calls = AtomicU32::new(0);

    let value = waiter(10, 1_000)
        .fetch(|| async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(VerifyError::transient("not yet")),
                n => Ok(n * 10),
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 10);
}
