//! Per-scenario execution context.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::Config;
use crate::domain::ports::{ClusterClient, NotificationSource};
use crate::services::{ClusterQueries, ConvergenceWaiter, DiagnosticSink, EventWatcher};

use super::cleanup::CleanupRegistry;

/// How long a wait may take, mapped onto the configured timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    Short,
    Medium,
    Long,
}

/// Everything a scenario needs: platform ports, configuration, the
/// diagnostic sink bound to the scenario, and the objects it created.
pub struct ScenarioContext {
    name: String,
    client: Arc<dyn ClusterClient>,
    notifications: Arc<dyn NotificationSource>,
    config: Config,
    diagnostics: Arc<dyn DiagnosticSink>,
    timeout_override: Option<Duration>,
    cleanup: CleanupRegistry,
}

impl ScenarioContext {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ClusterClient>,
        notifications: Arc<dyn NotificationSource>,
        config: Config,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            notifications,
            config,
            diagnostics,
            timeout_override: None,
            cleanup: CleanupRegistry::new(),
        }
    }

    /// Replace every wait's timeout with `timeout`.
    #[must_use]
    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &dyn ClusterClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.cluster.machine_api_namespace
    }

    pub fn diagnostics(&self) -> Arc<dyn DiagnosticSink> {
        Arc::clone(&self.diagnostics)
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    pub fn timeout(&self, budget: WaitBudget) -> Duration {
        self.timeout_override.unwrap_or_else(|| match budget {
            WaitBudget::Short => self.config.waits.short_timeout(),
            WaitBudget::Medium => self.config.waits.medium_timeout(),
            WaitBudget::Long => self.config.waits.long_timeout(),
        })
    }

    /// Waiter labelled `label`, reporting to this scenario's sink.
    pub fn waiter(&self, label: impl Into<String>, budget: WaitBudget) -> ConvergenceWaiter {
        ConvergenceWaiter::from_config(&self.config.waits, self.timeout(budget))
            .with_label(label)
            .with_diagnostics(self.diagnostics())
    }

    /// Retrying cluster reads; each read may take up to the short budget.
    pub fn queries(&self) -> ClusterQueries {
        ClusterQueries::new(
            Arc::clone(&self.client),
            self.config.cluster.clone(),
            self.waiter("cluster query", WaitBudget::Short),
        )
    }

    /// A fresh, idle event watcher over this context's notification source.
    pub fn watcher(&self) -> EventWatcher {
        EventWatcher::with_diagnostics(Arc::clone(&self.notifications), self.diagnostics())
    }

    /// Delete everything still tracked, waiting for each object to go away.
    /// Returns one message per object that could not be removed.
    pub async fn release(&self) -> Vec<String> {
        let waiter = self.waiter("cleanup", WaitBudget::Medium);
        self.cleanup.release(self.client(), &waiter).await
    }
}
