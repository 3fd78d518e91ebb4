//! `settle run`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use console::style;
use serde::Serialize;

use crate::cli::output::{create_spinner, output, CommandOutput, TableFormatter};
use crate::cli::types::RunArgs;
use crate::domain::models::Config;
use crate::infrastructure::kube::KubeCluster;
use crate::scenarios::{self, RunSummary, ScenarioRunner};

#[derive(Debug, Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub passed: usize,
    pub failed: usize,
}

impl From<RunSummary> for RunOutput {
    fn from(summary: RunSummary) -> Self {
        Self {
            passed: summary.passed(),
            failed: summary.failed(),
            summary,
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let table = TableFormatter::new().format_reports(&self.summary.reports);
        let verdict = if self.failed == 0 {
            style(format!("{} passed", self.passed)).green().bold()
        } else {
            style(format!("{} passed, {} failed", self.passed, self.failed))
                .red()
                .bold()
        };
        format!("{table}\n{verdict}")
    }
}

/// Run the selected scenarios against the configured cluster. Returns
/// whether every scenario passed.
pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<bool> {
    let selected = scenarios::select(&args.suites, args.scenario.as_deref());
    if selected.is_empty() {
        bail!("no scenario matches the given suites and filter");
    }

    let cluster = Arc::new(
        KubeCluster::connect(&config.cluster)
            .await
            .context("failed to connect to the cluster")?,
    );
    let runner = ScenarioRunner::new(cluster.clone(), cluster, config)
        .with_timeout_override(args.timeout.map(Duration::from_secs));

    let mut summary = RunSummary::default();
    for scenario in &selected {
        let spinner = (!json_mode).then(|| create_spinner(scenario.name()));
        let report = runner.run_one(scenario.as_ref()).await;
        if let Some(spinner) = spinner {
            let mark = if report.passed() {
                style("✓").green()
            } else {
                style("✗").red()
            };
            spinner.finish_with_message(format!("{mark} {}", report.name));
        }
        summary.reports.push(report);
    }

    let result = RunOutput::from(summary);
    let success = result.failed == 0;
    output(&result, json_mode);
    Ok(success)
}
