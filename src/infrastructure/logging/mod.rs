//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - pretty or JSON console output
//! - rolling JSON log files
//! - the tracing-backed diagnostic sink

pub mod logger;
pub mod sink;

pub use logger::LoggerImpl;
pub use sink::TracingSink;
