//! In-memory cluster.
//!
//! Implements both platform ports over a plain object map so that the
//! substrate and the scenarios can be exercised without a real cluster.
//! Tests drive it directly: seed objects, emit notifications, and inject
//! read or stream failures.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::{ClientError, SubscriptionError};
use crate::domain::models::{
    ClusterObject, LabelSelector, Notification, ObjectKind, ObjectRef, PropagationPolicy,
};
use crate::domain::ports::{ClusterClient, NotificationSource, Subscription};

type StreamItem = Result<Notification, SubscriptionError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Subscriber {
    tx: mpsc::UnboundedSender<StreamItem>,
    /// Items sent but not yet fully dispatched by the receiving side.
    pending: Arc<AtomicUsize>,
}

#[derive(Default)]
struct FailurePlan {
    reads: VecDeque<ClientError>,
    open: Option<String>,
}

#[derive(Default)]
pub struct InMemoryCluster {
    objects: Mutex<BTreeMap<ObjectRef, ClusterObject>>,
    subscribers: Mutex<Vec<Subscriber>>,
    failures: Mutex<FailurePlan>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: ObjectKind, namespace: Option<&str>, name: &str) -> ObjectRef {
        ObjectRef {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.map(str::to_string)
            } else {
                None
            },
            name: name.to_string(),
        }
    }

    /// Store an object as is, replacing any previous version. A uid is
    /// assigned if missing.
    pub fn insert(&self, object: impl Into<ClusterObject>) -> ClusterObject {
        let mut object = object.into();
        let meta = object.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(Uuid::new_v4().to_string());
        }
        let key = object.object_ref();
        lock(&self.objects).insert(key, object.clone());
        object
    }

    /// Apply `f` to a stored object. Returns false if it does not exist.
    pub fn modify(&self, target: &ObjectRef, f: impl FnOnce(&mut ClusterObject)) -> bool {
        match lock(&self.objects).get_mut(target) {
            Some(object) => {
                f(object);
                true
            }
            None => false,
        }
    }

    /// Drop a single object without cascading to its dependents.
    pub fn remove(&self, target: &ObjectRef) -> Option<ClusterObject> {
        lock(&self.objects).remove(target)
    }

    pub fn contains(&self, target: &ObjectRef) -> bool {
        lock(&self.objects).contains_key(target)
    }

    pub fn object(&self, target: &ObjectRef) -> Option<ClusterObject> {
        lock(&self.objects).get(target).cloned()
    }

    pub fn objects_of(&self, kind: ObjectKind) -> Vec<ClusterObject> {
        lock(&self.objects)
            .values()
            .filter(|o| o.kind() == kind)
            .cloned()
            .collect()
    }

    /// Make the next `count` list/get calls fail with `error`.
    pub fn fail_next_reads(&self, count: usize, error: ClientError) {
        let mut failures = lock(&self.failures);
        failures.reads.extend(std::iter::repeat(error).take(count));
    }

    /// Make the next `open` fail.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        lock(&self.failures).open = Some(message.into());
    }

    fn take_read_failure(&self) -> Result<(), ClientError> {
        lock(&self.failures).reads.pop_front().map_or(Ok(()), Err)
    }

    /// Deliver a notification to every open subscription.
    pub fn emit(&self, notification: Notification) {
        self.broadcast(Ok(notification));
    }

    /// Fail every open subscription with a stream error.
    pub fn fail_streams(&self, message: impl Into<String>) {
        self.broadcast(Err(SubscriptionError::Stream(message.into())));
    }

    /// End every open subscription.
    pub fn close_streams(&self) {
        lock(&self.subscribers).clear();
    }

    fn broadcast(&self, item: StreamItem) {
        lock(&self.subscribers).retain(|subscriber| {
            subscriber.pending.fetch_add(1, Ordering::SeqCst);
            if subscriber.tx.send(item.clone()).is_ok() {
                true
            } else {
                subscriber.pending.store(0, Ordering::SeqCst);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    /// Notifications emitted but not yet fully handled by their subscribers.
    pub fn pending_notifications(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .map(|s| s.pending.load(Ordering::SeqCst))
            .sum()
    }

    /// Wait until every emitted notification has been dispatched, giving up
    /// after a few seconds.
    pub async fn settle_notifications(&self) {
        for _ in 0..5_000 {
            if self.pending_notifications() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tracing::warn!(
            pending = self.pending_notifications(),
            "Notifications still pending"
        );
    }

    fn dependents_of(objects: &BTreeMap<ObjectRef, ClusterObject>, owner: &ClusterObject) -> Vec<ObjectRef> {
        objects
            .values()
            .filter(|o| o.meta().is_controlled_by(owner.kind(), owner.meta()))
            .map(ClusterObject::object_ref)
            .collect()
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_objects(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClientError> {
        self.take_read_failure()?;
        let namespace = namespace.filter(|_| kind.is_namespaced());
        Ok(lock(&self.objects)
            .values()
            .filter(|o| o.kind() == kind)
            .filter(|o| namespace.is_none() || o.meta().namespace.as_deref() == namespace)
            .filter(|o| selector.matches(&o.meta().labels))
            .cloned()
            .collect())
    }

    async fn get_object(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ClusterObject, ClientError> {
        self.take_read_failure()?;
        lock(&self.objects)
            .get(&Self::key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn create_object(&self, mut object: ClusterObject) -> Result<ClusterObject, ClientError> {
        let kind = object.kind();
        let meta = object.meta_mut();
        if meta.name.is_empty() {
            let Some(prefix) = meta.generate_name.as_deref() else {
                return Err(ClientError::Invalid(format!("{kind} has neither name nor generateName")));
            };
            let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
            meta.name = format!("{prefix}{suffix}");
        }
        if kind.is_namespaced() && meta.namespace.is_none() {
            return Err(ClientError::Invalid(format!("{kind} {:?} needs a namespace", meta.name)));
        }
        if !kind.is_namespaced() {
            meta.namespace = None;
        }
        meta.uid = Some(Uuid::new_v4().to_string());

        let key = object.object_ref();
        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(ClientError::Conflict(format!("{key} already exists")));
        }
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update_object(&self, mut object: ClusterObject) -> Result<ClusterObject, ClientError> {
        let key = object.object_ref();
        let mut objects = lock(&self.objects);
        let Some(existing) = objects.get(&key) else {
            return Err(ClientError::NotFound {
                kind: key.kind,
                name: key.name,
            });
        };
        object.meta_mut().uid = existing.meta().uid.clone();
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete_object(
        &self,
        target: &ObjectRef,
        propagation: PropagationPolicy,
    ) -> Result<(), ClientError> {
        let mut objects = lock(&self.objects);
        let Some(removed) = objects.remove(target) else {
            return Err(ClientError::NotFound {
                kind: target.kind,
                name: target.name.clone(),
            });
        };

        if propagation != PropagationPolicy::Orphan {
            let mut queue: VecDeque<ClusterObject> = VecDeque::from([removed]);
            while let Some(owner) = queue.pop_front() {
                for dependent in Self::dependents_of(&objects, &owner) {
                    if let Some(object) = objects.remove(&dependent) {
                        queue.push_back(object);
                    }
                }
            }
        }
        Ok(())
    }
}

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    pending: Arc<AtomicUsize>,
    in_flight: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Notification>, SubscriptionError> {
        // Being asked for the next item means the previous one was handled.
        if std::mem::take(&mut self.in_flight) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        match self.rx.recv().await {
            Some(Ok(notification)) => {
                self.in_flight = true;
                Ok(Some(notification))
            }
            Some(Err(error)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(error)
            }
            None => Ok(None),
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.pending.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSource for InMemoryCluster {
    async fn open(&self) -> Result<Box<dyn Subscription>, SubscriptionError> {
        if let Some(message) = lock(&self.failures).open.take() {
            return Err(SubscriptionError::Open(message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        lock(&self.subscribers).push(Subscriber {
            tx,
            pending: Arc::clone(&pending),
        });
        Ok(Box::new(MemorySubscription {
            rx,
            pending,
            in_flight: false,
        }))
    }
}
