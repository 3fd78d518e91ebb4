//! Counters fed by an [`EventWatcher`].
//!
//! The counter owns its value; the watcher only holds a registration that
//! points at it. Disabling freezes the value without unregistering, and
//! re-enabling resumes from where it stopped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event_watcher::{EventWatcher, NotificationHandler, RegistrationHandle};
use super::predicate::Predicate;
use crate::domain::models::Notification;

/// `(current, notification) -> next`. Caller-owned state lives in the closure.
pub type UpdateRule = Arc<dyn Fn(u64, &Notification) -> u64 + Send + Sync>;

/// The common rule: add one per matching notification.
pub fn increment() -> UpdateRule {
    Arc::new(|value, _| value.saturating_add(1))
}

#[derive(Debug)]
struct CounterState {
    value: u64,
    enabled: bool,
}

fn lock(state: &Mutex<CounterState>) -> MutexGuard<'_, CounterState> {
    // A panicking rule never gets to assign, so a poisoned value is intact.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CounterHandler {
    state: Arc<Mutex<CounterState>>,
    rule: UpdateRule,
}

impl NotificationHandler for CounterHandler {
    fn handle(&self, notification: &Notification) -> Result<(), String> {
        let mut state = lock(&self.state);
        if state.enabled {
            state.value = (self.rule)(state.value, notification);
        }
        Ok(())
    }
}

/// A thread-safe count of matching notifications.
pub struct EventCounter {
    name: String,
    state: Arc<Mutex<CounterState>>,
    registration: RegistrationHandle,
}

impl EventCounter {
    /// Register a counter with `watcher`. The counter is enabled on return.
    pub fn attach(
        watcher: &EventWatcher,
        name: impl Into<String>,
        predicate: Predicate,
        initial: u64,
        rule: UpdateRule,
    ) -> Self {
        let name = name.into();
        let state = Arc::new(Mutex::new(CounterState {
            value: initial,
            enabled: true,
        }));
        let handler = CounterHandler {
            state: Arc::clone(&state),
            rule,
        };
        let registration = watcher.register(name.clone(), predicate, Arc::new(handler));

        Self {
            name,
            state,
            registration,
        }
    }

    /// Shorthand for an incrementing counter starting at zero.
    pub fn counting(watcher: &EventWatcher, name: impl Into<String>, predicate: Predicate) -> Self {
        Self::attach(watcher, name, predicate, 0, increment())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> u64 {
        lock(&self.state).value
    }

    pub fn enable(&self) {
        let mut state = lock(&self.state);
        state.enabled = true;
        self.registration.enable();
    }

    pub fn disable(&self) {
        // Flipping the flag under the value lock means an update already
        // past the registration check still sees the counter as disabled.
        let mut state = lock(&self.state);
        state.enabled = false;
        self.registration.disable();
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// Remove the counter's registration from `watcher`. The value stays readable.
    pub fn detach(&self, watcher: &EventWatcher) -> bool {
        watcher.unregister(&self.registration)
    }
}

impl std::fmt::Debug for EventCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("EventCounter")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("enabled", &state.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::infrastructure::memory::InMemoryCluster;
    use crate::services::predicate::NotificationFilter;

    fn scale_up(group: &str) -> Notification {
        Notification::builder("cluster-autoscaler")
            .reason("ScaledUpGroup")
            .message(format!("Scale-up: setting group {group} size to 2"))
            .build()
    }

    #[tokio::test]
    async fn test_counter_counts_and_freezes() {
        let cluster = Arc::new(InMemoryCluster::new());
        let watcher = EventWatcher::new(cluster.clone());
        let counter = EventCounter::counting(
            &watcher,
            "scale-up",
            NotificationFilter::new().reason("ScaledUpGroup").into(),
        );
        assert!(counter.is_enabled());

        watcher.start().await.unwrap();
        cluster.emit(scale_up("a"));
        cluster.settle_notifications().await;
        assert_eq!(counter.get(), 1);

        counter.disable();
        cluster.emit(scale_up("b"));
        cluster.settle_notifications().await;
        assert_eq!(counter.get(), 1);

        counter.enable();
        cluster.emit(scale_up("c"));
        cluster.settle_notifications().await;
        watcher.stop().await;
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn test_stateful_rule_counts_each_group_once() {
        let cluster = Arc::new(InMemoryCluster::new());
        let watcher = EventWatcher::new(cluster.clone());

        let seen = Mutex::new(HashSet::new());
        let rule: UpdateRule = Arc::new(move |value, n: &Notification| {
            let group = n.message.split_whitespace().nth(3).unwrap_or_default().to_string();
            if seen.lock().unwrap().insert(group) {
                value + 1
            } else {
                value
            }
        });
        let counter = EventCounter::attach(&watcher, "groups", Predicate::any(), 0, rule);

        watcher.start().await.unwrap();
        for group in ["a", "b", "a", "c", "b"] {
            cluster.emit(scale_up(group));
        }
        cluster.settle_notifications().await;
        watcher.stop().await;

        assert_eq!(counter.get(), 3);
    }

    #[tokio::test]
    async fn test_panicking_rule_keeps_value() {
        let cluster = Arc::new(InMemoryCluster::new());
        let watcher = EventWatcher::new(cluster.clone());
        let rule: UpdateRule = Arc::new(|value, n: &Notification| {
            assert!(n.reason != "Boom", "rule exploded");
            value + 1
        });
        let counter = EventCounter::attach(&watcher, "fragile", Predicate::any(), 10, rule);

        watcher.start().await.unwrap();
        cluster.emit(Notification::builder("x").reason("Ok").build());
        cluster.emit(Notification::builder("x").reason("Boom").build());
        cluster.emit(Notification::builder("x").reason("Ok").build());
        cluster.settle_notifications().await;
        watcher.stop().await;

        assert_eq!(counter.get(), 12);
        assert_eq!(watcher.stats().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_detach() {
        let cluster = Arc::new(InMemoryCluster::new());
        let watcher = EventWatcher::new(cluster.clone());
        let counter = EventCounter::counting(&watcher, "all", Predicate::any());

        watcher.start().await.unwrap();
        cluster.emit(scale_up("a"));
        cluster.settle_notifications().await;
        assert!(counter.detach(&watcher));
        cluster.emit(scale_up("b"));
        cluster.settle_notifications().await;
        watcher.stop().await;

        assert_eq!(counter.get(), 1);
    }
}
