use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;

use super::{Scenario, ScenarioContext, Suite};
use crate::domain::models::Config;
use crate::domain::ports::{ClusterClient, NotificationSource};
use crate::infrastructure::logging::TracingSink;
use crate::services::DiagnosticSink;

type SinkFactory = Arc<dyn Fn(&str) -> Arc<dyn DiagnosticSink> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub suite: Suite,
    pub name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<ScenarioReport>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs scenarios one at a time against a pair of platform ports.
pub struct ScenarioRunner {
    client: Arc<dyn ClusterClient>,
    notifications: Arc<dyn NotificationSource>,
    config: Config,
    timeout_override: Option<Duration>,
    sinks: SinkFactory,
}

impl ScenarioRunner {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        notifications: Arc<dyn NotificationSource>,
        config: Config,
    ) -> Self {
        Self {
            client,
            notifications,
            config,
            timeout_override: None,
            sinks: Arc::new(|name| Arc::new(TracingSink::new(name)) as Arc<dyn DiagnosticSink>),
        }
    }

    #[must_use]
    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    /// Build each scenario's diagnostic sink with `factory` instead of
    /// logging through `tracing`.
    #[must_use]
    pub fn with_sink_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn DiagnosticSink> + Send + Sync + 'static,
    {
        self.sinks = Arc::new(factory);
        self
    }

    fn context_for(&self, scenario: &dyn Scenario) -> ScenarioContext {
        ScenarioContext::new(
            scenario.name(),
            Arc::clone(&self.client),
            Arc::clone(&self.notifications),
            self.config.clone(),
            (self.sinks)(scenario.name()),
        )
        .with_timeout_override(self.timeout_override)
    }

    /// Run one scenario, then delete whatever it left tracked. A panic in
    /// the scenario is reported as a failure.
    pub async fn run_one(&self, scenario: &dyn Scenario) -> ScenarioReport {
        let ctx = self.context_for(scenario);
        let started = Instant::now();
        tracing::info!(suite = %scenario.suite(), scenario = scenario.name(), "Running scenario");

        let result = AssertUnwindSafe(scenario.run(&ctx)).catch_unwind().await;
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(_) => Some("scenario panicked".to_string()),
        };
        let cleanup_errors = ctx.release().await;

        let outcome = if error.is_none() && cleanup_errors.is_empty() {
            Outcome::Passed
        } else {
            Outcome::Failed
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &error {
            None => tracing::info!(scenario = scenario.name(), duration_ms, "Scenario passed"),
            Some(e) => tracing::error!(scenario = scenario.name(), duration_ms, error = %e, "Scenario failed"),
        }

        ScenarioReport {
            suite: scenario.suite(),
            name: scenario.name().to_string(),
            outcome,
            duration_ms,
            error,
            cleanup_errors,
        }
    }

    pub async fn run_all(&self, scenarios: &[Box<dyn Scenario>]) -> RunSummary {
        let mut summary = RunSummary::default();
        for scenario in scenarios {
            summary.reports.push(self.run_one(scenario.as_ref()).await);
        }
        summary
    }
}
