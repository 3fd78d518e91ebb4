//! Core `Event` objects as a notification stream.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use tracing::{debug, warn};

use super::client::KubeCluster;
use crate::domain::errors::SubscriptionError;
use crate::domain::models::{InvolvedObject, Notification, SourceIdentity};
use crate::domain::ports::{NotificationSource, Subscription};

/// Consecutive watch errors tolerated before the subscription gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

type EventStream = Pin<Box<dyn Stream<Item = Result<watcher::Event<Event>, watcher::Error>> + Send>>;

/// When the event was last recorded, falling back to its first occurrence.
fn recorded_at(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
}

/// Convert a core event into a notification.
pub fn notification_from_event(event: Event) -> Notification {
    let timestamp = recorded_at(&event).unwrap_or_else(Utc::now);
    let source = event.source.unwrap_or_default();
    let component = source
        .component
        .or(event.reporting_component)
        .unwrap_or_default();

    Notification {
        source: SourceIdentity {
            component,
            host: source.host,
        },
        reason: event.reason.unwrap_or_default(),
        message: event.message.unwrap_or_default(),
        involved_object: InvolvedObject {
            kind: event.involved_object.kind.unwrap_or_default(),
            namespace: event.involved_object.namespace,
            name: event.involved_object.name.unwrap_or_default(),
        },
        timestamp,
    }
}

/// Decide whether a watch item carries an event for the subscriber.
///
/// Live changes always pass. Items replayed by a (re)list pass only when
/// they were recorded at or after `opened_at`, so events landing between
/// `open()` and the first list, or while a desynced watch was down, are not
/// lost. Undated replays are skipped.
pub fn admit(item: watcher::Event<Event>, opened_at: DateTime<Utc>) -> Option<Event> {
    match item {
        watcher::Event::Apply(event) => Some(event),
        watcher::Event::InitApply(event) if recorded_at(&event).is_some_and(|at| at >= opened_at) => {
            Some(event)
        }
        _ => None,
    }
}

/// Identity of one recorded state of an event object.
fn revision(event: &Event) -> Option<(String, String)> {
    Some((
        event.metadata.uid.clone()?,
        event.metadata.resource_version.clone()?,
    ))
}

/// Live watch over events in all namespaces.
///
/// Every list the watcher performs is replayed through [`admit`]; revisions
/// already handed out are not handed out twice.
pub struct EventSubscription {
    stream: EventStream,
    opened_at: DateTime<Utc>,
    delivered: HashSet<(String, String)>,
    consecutive_errors: u32,
}

impl EventSubscription {
    fn new(stream: EventStream, opened_at: DateTime<Utc>) -> Self {
        Self {
            stream,
            opened_at,
            delivered: HashSet::new(),
            consecutive_errors: 0,
        }
    }

    /// Admit a watch item, dropping revisions seen before.
    fn accept(&mut self, item: watcher::Event<Event>) -> Option<Notification> {
        let event = admit(item, self.opened_at)?;
        if let Some(key) = revision(&event) {
            if !self.delivered.insert(key) {
                return None;
            }
        }
        Some(notification_from_event(event))
    }
}

#[async_trait]
impl Subscription for EventSubscription {
    async fn next(&mut self) -> Result<Option<Notification>, SubscriptionError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(item)) => {
                    self.consecutive_errors = 0;
                    if matches!(item, watcher::Event::InitDone) {
                        debug!("Event watch synced");
                    }
                    if let Some(notification) = self.accept(item) {
                        return Ok(Some(notification));
                    }
                }
                Some(Err(e)) => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(SubscriptionError::Stream(e.to_string()));
                    }
                    warn!(error = %e, attempt = self.consecutive_errors, "Event watch error, retrying");
                }
            }
        }
    }
}

#[async_trait]
impl NotificationSource for KubeCluster {
    async fn open(&self) -> Result<Box<dyn Subscription>, SubscriptionError> {
        let opened_at = Utc::now();
        let api: Api<Event> = Api::all(self.client());
        // Fail fast on RBAC or connectivity problems instead of inside the stream.
        api.list_metadata(&kube::api::ListParams::default().limit(1))
            .await
            .map_err(|e| SubscriptionError::Open(e.to_string()))?;

        let stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        Ok(Box::new(EventSubscription::new(stream, opened_at)))
    }
}
