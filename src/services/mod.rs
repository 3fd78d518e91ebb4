pub mod cluster_queries;
pub mod convergence;
pub mod diagnostics;
pub mod event_counter;
pub mod event_watcher;
pub mod predicate;
pub mod probes;

pub use cluster_queries::ClusterQueries;
pub use convergence::{ConvergenceWaiter, ErrorClassifier};
pub use diagnostics::{Diagnostic, DiagnosticSink, NullSink, RecordingSink};
pub use event_counter::{increment, EventCounter, UpdateRule};
pub use event_watcher::{
    EventWatcher, NotificationHandler, RegistrationHandle, RegistrationId, WatcherStats,
};
pub use predicate::{NotificationFilter, Predicate};
