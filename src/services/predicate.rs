//! Notification predicates.
//!
//! A [`Predicate`] is an opaque, cloneable `Fn(&Notification) -> bool`. Any
//! state a predicate needs (e.g. "groups already seen") is captured by the
//! closure that creates it.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use crate::domain::models::Notification;

#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Notification) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Notification) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Matches every notification.
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    /// Matches nothing.
    pub fn none() -> Self {
        Self::new(|_| false)
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        (self.0)(notification)
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::new(move |n| self.matches(n) && other.matches(n))
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::new(move |n| self.matches(n) || other.matches(n))
    }
}

impl Not for Predicate {
    type Output = Self;

    fn not(self) -> Self {
        Self::new(move |n| !self.matches(n))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Field-based filter over notifications. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub component: Option<String>,
    pub reason: Option<String>,
    pub involved_kind: Option<String>,
    pub message_prefix: Option<String>,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn involved_kind(mut self, kind: impl Into<String>) -> Self {
        self.involved_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.message_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        if let Some(component) = &self.component {
            if notification.source.component != *component {
                return false;
            }
        }
        if let Some(reason) = &self.reason {
            if notification.reason != *reason {
                return false;
            }
        }
        if let Some(kind) = &self.involved_kind {
            if notification.involved_object.kind != *kind {
                return false;
            }
        }
        if let Some(prefix) = &self.message_prefix {
            if !notification.message.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn into_predicate(self) -> Predicate {
        Predicate::new(move |n| self.matches(n))
    }
}

impl From<NotificationFilter> for Predicate {
    fn from(filter: NotificationFilter) -> Self {
        filter.into_predicate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_up() -> Notification {
        Notification::builder("cluster-autoscaler")
            .reason("ScaledUpGroup")
            .message("Scale-up: setting group workers-a size to 2")
            .involving("ConfigMap", "cluster-autoscaler-status")
            .build()
    }

    #[test]
    fn test_filter_fields() {
        let n = scale_up();
        assert!(NotificationFilter::new().matches(&n));
        assert!(NotificationFilter::new()
            .component("cluster-autoscaler")
            .reason("ScaledUpGroup")
            .involved_kind("ConfigMap")
            .message_prefix("Scale-up: setting group")
            .matches(&n));
        assert!(!NotificationFilter::new().reason("ScaleDownEmpty").matches(&n));
        assert!(!NotificationFilter::new().component("kubelet").matches(&n));
        assert!(!NotificationFilter::new().message_prefix("Scale-down").matches(&n));
    }

    #[test]
    fn test_composition() {
        let n = scale_up();
        let up: Predicate = NotificationFilter::new().reason("ScaledUpGroup").into();
        let down: Predicate = NotificationFilter::new().reason("ScaleDownEmpty").into();

        assert!(up.clone().or(down.clone()).matches(&n));
        assert!(!up.clone().and(down.clone()).matches(&n));
        assert!((!down).matches(&n));
        assert!(!(!up).matches(&n));
        assert!(Predicate::any().matches(&n));
        assert!(!Predicate::none().matches(&n));
    }
}
