//! Table output for scenario listings and run reports.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::scenarios::{Outcome, Scenario, ScenarioReport};

pub struct TableFormatter {
    use_colors: bool,
}

impl TableFormatter {
    /// Colors follow `console`'s view of stdout (NO_COLOR, dumb terminals, pipes).
    pub fn new() -> Self {
        Self {
            use_colors: console::colors_enabled(),
        }
    }

    pub const fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    fn base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if !self.use_colors {
            table.force_no_tty();
        }
        table
    }

    fn header(&self, titles: &[&str]) -> Vec<Cell> {
        titles
            .iter()
            .map(|t| Cell::new(t).add_attribute(Attribute::Bold))
            .collect()
    }

    pub fn format_scenarios(&self, scenarios: &[Box<dyn Scenario>]) -> String {
        let mut table = self.base_table();
        table.set_header(self.header(&["Suite", "Scenario"]));
        for scenario in scenarios {
            table.add_row(vec![
                Cell::new(scenario.suite()),
                Cell::new(scenario.name()),
            ]);
        }
        table.to_string()
    }

    pub fn format_reports(&self, reports: &[ScenarioReport]) -> String {
        let mut table = self.base_table();
        table.set_header(self.header(&["Suite", "Scenario", "Result", "Duration", "Error"]));
        for report in reports {
            let outcome = match report.outcome {
                Outcome::Passed => "PASS",
                Outcome::Failed => "FAIL",
            };
            let outcome_cell = if self.use_colors {
                Cell::new(outcome).fg(outcome_color(report.outcome))
            } else {
                Cell::new(outcome)
            };

            let mut errors: Vec<String> = report.error.iter().cloned().collect();
            errors.extend(report.cleanup_errors.iter().map(|e| format!("cleanup: {e}")));

            table.add_row(vec![
                Cell::new(report.suite),
                Cell::new(&report.name),
                outcome_cell,
                Cell::new(format_duration(report.duration_ms)),
                Cell::new(if errors.is_empty() { "-".to_string() } else { errors.join("\n") }),
            ]);
        }
        table.to_string()
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

const fn outcome_color(outcome: Outcome) -> Color {
    match outcome {
        Outcome::Passed => Color::Green,
        Outcome::Failed => Color::Red,
    }
}

fn format_duration(ms: u64) -> String {
    match ms {
        0..=999 => format!("{ms}ms"),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1_000.0),
        _ => format!("{}m{:02}s", ms / 60_000, (ms / 1_000) % 60),
    }
}
