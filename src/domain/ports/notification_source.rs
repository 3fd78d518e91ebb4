use async_trait::async_trait;

use crate::domain::errors::SubscriptionError;
use crate::domain::models::Notification;

/// Port producing live control-plane notifications.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Open a new subscription. Only notifications emitted after this call
    /// returns are guaranteed to be delivered.
    async fn open(&self) -> Result<Box<dyn Subscription>, SubscriptionError>;
}

/// One open notification stream.
///
/// Buffering and back-pressure are the implementation's business; callers
/// only pull.
#[async_trait]
pub trait Subscription: Send {
    /// Next notification, `Ok(None)` once the stream has ended.
    async fn next(&mut self) -> Result<Option<Notification>, SubscriptionError>;
}
