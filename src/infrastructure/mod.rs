//! Infrastructure layer.
//!
//! Adapters that satisfy the domain ports, plus configuration and logging:
//! - `kube`: live cluster client and event stream
//! - `memory`: in-process cluster used by the test suites
//! - `config`: layered configuration loading
//! - `logging`: tracing subscriber setup and the diagnostic sink

pub mod config;
pub mod kube;
pub mod logging;
pub mod memory;
