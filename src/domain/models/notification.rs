//! Control-plane notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Component (and optionally host) that emitted a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub component: String,
    pub host: Option<String>,
}

/// The object a notification is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedObject {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// One observed occurrence emitted by the control plane.
///
/// Notifications are produced by a `NotificationSource` and handed to
/// handlers by shared reference only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub source: SourceIdentity,
    pub reason: String,
    pub message: String,
    pub involved_object: InvolvedObject,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Start building a notification emitted by `component`.
    pub fn builder(component: impl Into<String>) -> NotificationBuilder {
        NotificationBuilder {
            inner: Self {
                source: SourceIdentity {
                    component: component.into(),
                    host: None,
                },
                reason: String::new(),
                message: String::new(),
                involved_object: InvolvedObject::default(),
                timestamp: Utc::now(),
            },
        }
    }
}

/// Builder for [`Notification`], mostly useful for adapters and tests.
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    inner: Notification,
}

impl NotificationBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.inner.source.host = Some(host.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.inner.reason = reason.into();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.inner.message = message.into();
        self
    }

    pub fn involving(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.inner.involved_object.kind = kind.into();
        self.inner.involved_object.name = name.into();
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.inner.involved_object.namespace = Some(namespace.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.inner.timestamp = timestamp;
        self
    }

    pub fn build(self) -> Notification {
        self.inner
    }
}
