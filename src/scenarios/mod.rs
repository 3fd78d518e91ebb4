//! End-to-end verification scenarios built on the substrate.
//!
//! A scenario disturbs the platform and asserts that its controllers bring
//! it back. Scenarios are grouped in suites selectable from the CLI.

pub mod autoscaler;
pub mod cleanup;
pub mod context;
pub mod infra;
pub mod operators;
mod runner;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cleanup::CleanupRegistry;
pub use context::{ScenarioContext, WaitBudget};
pub use runner::{Outcome, RunSummary, ScenarioReport, ScenarioRunner};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Suite {
    /// Cluster autoscaler scale up and down
    Autoscaler,
    /// Machine API operator reconciliation
    Operators,
    /// Worker machine set scaling
    Infra,
}

impl Suite {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Autoscaler => "autoscaler",
            Self::Operators => "operators",
            Self::Infra => "infra",
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    fn suite(&self) -> Suite;

    /// Run to completion. Objects tracked in the context's cleanup registry
    /// are deleted by the runner afterwards, whatever the outcome.
    async fn run(&self, ctx: &ScenarioContext) -> anyhow::Result<()>;
}

/// Every known scenario, in execution order.
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    let mut scenarios: Vec<Box<dyn Scenario>> = Vec::new();
    scenarios.extend(operators::scenarios());
    scenarios.extend(infra::scenarios());
    scenarios.extend(autoscaler::scenarios());
    scenarios
}

/// Scenarios of the given suites (all suites when empty) whose name
/// contains `filter`.
pub fn select(suites: &[Suite], filter: Option<&str>) -> Vec<Box<dyn Scenario>> {
    catalog()
        .into_iter()
        .filter(|s| suites.is_empty() || suites.contains(&s.suite()))
        .filter(|s| filter.map_or(true, |f| s.name().contains(f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = catalog().iter().map(|s| s.name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_select_by_suite_and_filter() {
        let operators = select(&[Suite::Operators], None);
        assert!(!operators.is_empty());
        assert!(operators.iter().all(|s| s.suite() == Suite::Operators));

        let all = select(&[], None);
        assert_eq!(all.len(), catalog().len());

        let filtered = select(&[], Some("daemon set"));
        assert!(filtered.iter().all(|s| s.name().contains("daemon set")));
        assert!(!filtered.is_empty());

        assert!(select(&[Suite::Infra], Some("no such scenario")).is_empty());
    }
}
