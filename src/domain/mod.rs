//! Domain layer for settle
//!
//! Platform object models, the notification record, error taxonomy and the
//! ports through which everything else talks to the platform.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ClientError, SubscriptionError, VerifyError, VerifyResult};
