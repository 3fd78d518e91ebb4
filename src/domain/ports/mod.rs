//! Port trait definitions (Hexagonal Architecture)
//!
//! - ClusterClient: reads and writes platform objects
//! - NotificationSource / Subscription: the live notification stream
//!
//! Adapters for a real cluster and for an in-memory simulation live under
//! `infrastructure`.

pub mod cluster_client;
pub mod notification_source;

pub use cluster_client::{ClusterClient, ClusterClientExt};
pub use notification_source::{NotificationSource, Subscription};
