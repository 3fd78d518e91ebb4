//! Settle - out-of-band convergence verification
//!
//! Settle disturbs a self-healing cluster control plane and verifies that it
//! converges back, by polling observable state and by counting the
//! notifications its controllers emit.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the platform ports
//! - **Service Layer** (`services`): event watcher, counters, convergence
//!   waiter, reconciliation probes
//! - **Scenarios** (`scenarios`): the end-to-end checks built on the services
//! - **Infrastructure Layer** (`infrastructure`): kube and in-memory adapters,
//!   configuration, logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use settle::services::{ConvergenceWaiter, EventCounter, EventWatcher, NotificationFilter};
//!
//! let watcher = EventWatcher::new(source);
//! let scale_ups = EventCounter::counting(
//!     &watcher,
//!     "scale-up",
//!     NotificationFilter::new().reason("ScaledUpGroup").into(),
//! );
//! watcher.start().await?;
//! waiter.eventually(|| async { Ok(scale_ups.get() == 2) }).await?;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod scenarios;
pub mod services;

pub use domain::errors::{ClientError, SubscriptionError, VerifyError, VerifyResult};
pub use domain::models::{Config, Notification};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ConvergenceWaiter, EventCounter, EventWatcher, Predicate};
