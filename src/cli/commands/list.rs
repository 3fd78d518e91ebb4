//! `settle list`

use serde::Serialize;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::scenarios::{self, Suite};

#[derive(Debug, Serialize)]
pub struct ScenarioEntry {
    pub suite: Suite,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioListOutput {
    pub scenarios: Vec<ScenarioEntry>,
    #[serde(skip)]
    table: String,
}

impl CommandOutput for ScenarioListOutput {
    fn to_human(&self) -> String {
        if self.scenarios.is_empty() {
            return "No scenarios found.".to_string();
        }
        self.table.clone()
    }
}

pub fn list_output(suites: &[Suite]) -> ScenarioListOutput {
    let selected = scenarios::select(suites, None);
    ScenarioListOutput {
        table: TableFormatter::new().format_scenarios(&selected),
        scenarios: selected
            .iter()
            .map(|s| ScenarioEntry {
                suite: s.suite(),
                name: s.name().to_string(),
            })
            .collect(),
    }
}

pub fn execute(suites: &[Suite], json_mode: bool) {
    output(&list_output(suites), json_mode);
}
