//! Live notification fan-out.
//!
//! An [`EventWatcher`] owns exactly one subscription to a
//! [`NotificationSource`]. A background task pulls notifications and, for
//! each one, synchronously invokes every enabled registration whose
//! predicate matches. Handler errors and panics are reported to the
//! diagnostic sink and never stop delivery to other registrations.
//!
//! Lifecycle is `Idle -> Running -> Stopped`; `Stopped` is terminal.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::diagnostics::{Diagnostic, DiagnosticSink, NullSink};
use super::predicate::Predicate;
use crate::domain::errors::{SubscriptionError, VerifyError, VerifyResult};
use crate::domain::models::Notification;
use crate::domain::ports::{NotificationSource, Subscription};

/// Unique identifier for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives matching notifications. Runs on the dispatch task and must not
/// block.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, notification: &Notification) -> Result<(), String>;
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification) -> Result<(), String> + Send + Sync,
{
    fn handle(&self, notification: &Notification) -> Result<(), String> {
        self(notification)
    }
}

struct Registration {
    id: RegistrationId,
    name: String,
    predicate: Predicate,
    handler: Arc<dyn NotificationHandler>,
    enabled: AtomicBool,
}

/// Handle to a registration. Cheap to clone; toggling through any clone
/// affects the same registration.
#[derive(Clone)]
pub struct RegistrationHandle {
    inner: Arc<Registration>,
}

impl RegistrationHandle {
    pub fn id(&self) -> RegistrationId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Counters describing what a watcher has done so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    pub received: u64,
    pub delivered: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct StatCounters {
    received: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            received: self.received.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            handler_failures: self.handler_failures.load(Ordering::SeqCst),
        }
    }
}

enum Lifecycle {
    Idle,
    Running {
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

type Registry = Arc<RwLock<Vec<Arc<Registration>>>>;

/// State shared between the watcher and its dispatch task.
#[derive(Clone)]
struct Dispatcher {
    registrations: Registry,
    stats: Arc<StatCounters>,
    diagnostics: Arc<dyn DiagnosticSink>,
    terminal_error: Arc<Mutex<Option<SubscriptionError>>>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    fn dispatch(&self, notification: &Notification) {
        self.stats.received.fetch_add(1, Ordering::SeqCst);

        // Registrations added while this pass runs see the next notification.
        let snapshot: Vec<Arc<Registration>> = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for registration in snapshot
            .iter()
            .filter(|r| r.enabled.load(Ordering::SeqCst))
        {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if registration.predicate.matches(notification) {
                    registration.handler.handle(notification).map(|()| true)
                } else {
                    Ok(false)
                }
            }));

            match outcome {
                Ok(Ok(true)) => {
                    self.stats.delivered.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Ok(false)) => {}
                Ok(Err(error)) => self.handler_failed(registration, error),
                Err(payload) => self.handler_failed(registration, panic_message(payload.as_ref())),
            }
        }
    }

    fn handler_failed(&self, registration: &Registration, error: String) {
        self.stats.handler_failures.fetch_add(1, Ordering::SeqCst);
        self.diagnostics.record(Diagnostic::HandlerFailed {
            registration: registration.name.clone(),
            error,
        });
    }

    async fn run(self, mut subscription: Box<dyn Subscription>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(notification)) => self.dispatch(&notification),
                Ok(None) => {
                    self.diagnostics
                        .record(Diagnostic::SubscriptionEnded { error: None });
                    break;
                }
                Err(error) => {
                    self.diagnostics.record(Diagnostic::SubscriptionEnded {
                        error: Some(error.to_string()),
                    });
                    *self
                        .terminal_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(error);
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Watches a notification source and fans notifications out to registrations.
pub struct EventWatcher {
    source: Arc<dyn NotificationSource>,
    dispatcher: Dispatcher,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl EventWatcher {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self::with_diagnostics(source, Arc::new(NullSink))
    }

    pub fn with_diagnostics(
        source: Arc<dyn NotificationSource>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            source,
            dispatcher: Dispatcher {
                registrations: Arc::new(RwLock::new(Vec::new())),
                stats: Arc::new(StatCounters::default()),
                diagnostics,
                terminal_error: Arc::new(Mutex::new(None)),
                running: Arc::new(AtomicBool::new(false)),
            },
            lifecycle: AsyncMutex::new(Lifecycle::Idle),
        }
    }

    /// Open the subscription and spawn the dispatch task.
    ///
    /// A failure to open leaves the watcher idle so the caller may retry.
    pub async fn start(&self) -> VerifyResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running { .. } => return Err(VerifyError::AlreadyRunning),
            Lifecycle::Stopped => return Err(VerifyError::WatcherStopped),
            Lifecycle::Idle => {}
        }

        let subscription = self.source.open().await?;
        self.dispatcher
            .diagnostics
            .record(Diagnostic::SubscriptionOpened);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.dispatcher.running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(self.dispatcher.clone().run(subscription, shutdown_rx));

        *lifecycle = Lifecycle::Running {
            shutdown: shutdown_tx,
            task,
        };
        Ok(())
    }

    /// Close the subscription and wait for the dispatch task to finish.
    ///
    /// Idempotent. Once this returns no handler is invoked again, and the
    /// watcher cannot be restarted.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);

        if let Lifecycle::Running { shutdown, task } = previous {
            // The task may already have exited if the stream ended.
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Event watcher task did not shut down cleanly");
            }

            let stats = self.stats();
            self.dispatcher.diagnostics.record(Diagnostic::WatcherStopped {
                received: stats.received,
                handler_failures: stats.handler_failures,
            });
        }
        self.dispatcher.running.store(false, Ordering::SeqCst);
    }

    /// Add a fan-out target. It is enabled immediately and sees only
    /// notifications arriving after this call.
    pub fn register(
        &self,
        name: impl Into<String>,
        predicate: Predicate,
        handler: Arc<dyn NotificationHandler>,
    ) -> RegistrationHandle {
        let registration = Arc::new(Registration {
            id: RegistrationId::new(),
            name: name.into(),
            predicate,
            handler,
            enabled: AtomicBool::new(true),
        });
        self.dispatcher
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&registration));
        RegistrationHandle {
            inner: registration,
        }
    }

    /// Register a closure handler.
    pub fn on_notification<F>(
        &self,
        name: impl Into<String>,
        predicate: Predicate,
        handler: F,
    ) -> RegistrationHandle
    where
        F: Fn(&Notification) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(name, predicate, Arc::new(handler))
    }

    /// Remove a registration. Returns false if it was not registered.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let mut registrations = self
            .dispatcher
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.id());
        registrations.len() != before
    }

    pub fn enable(&self, handle: &RegistrationHandle) {
        handle.enable();
    }

    pub fn disable(&self, handle: &RegistrationHandle) {
        handle.disable();
    }

    /// True while the dispatch task is pulling from the subscription.
    pub fn is_running(&self) -> bool {
        self.dispatcher.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WatcherStats {
        self.dispatcher.stats.snapshot()
    }

    /// The error that ended the subscription, if it failed.
    pub fn subscription_error(&self) -> Option<SubscriptionError> {
        self.dispatcher
            .terminal_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of all registrations (snapshot).
    pub fn registration_names(&self) -> Vec<String> {
        self.dispatcher
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.try_lock() {
            if let Lifecycle::Running { task, .. } = &*lifecycle {
                task.abort();
            }
        }
    }
}
