//! Live cluster adapter built on `kube`.

mod client;
pub mod codec;
mod events;

pub use client::KubeCluster;
pub use events::{notification_from_event, EventSubscription};
