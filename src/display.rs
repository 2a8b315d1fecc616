//! Report rendering for health runs and action outcomes.

use crate::classify::classify_power_status;
use crate::dispatch::ActionOutcomes;
use crate::models::{Category, NodeOutcome};
use owo_colors::OwoColorize;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// One assembled row of the health report, each cell already classified.
#[derive(Debug, Clone)]
pub struct HealthReportRow {
    pub node: String,
    pub power: (String, Category),
    pub daemon: (String, Category),
    pub slurm: (String, Category),
    pub health: (String, Category),
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "#")]
    seq: String,

    #[tabled(rename = "Node")]
    node: String,

    #[tabled(rename = "Power")]
    power: String,

    #[tabled(rename = "Daemon")]
    daemon: String,

    #[tabled(rename = "Slurm")]
    slurm: String,

    #[tabled(rename = "Health")]
    health: String,
}

fn paint(cell: &(String, Category)) -> String {
    let (text, category) = cell;
    if text.is_empty() {
        category.paint("-")
    } else {
        category.paint(text)
    }
}

/// Render the health report as a rounded table, rows in input order.
pub fn format_health_report(rows: &[HealthReportRow]) -> String {
    if rows.is_empty() {
        return "No nodes found".yellow().to_string();
    }

    let table_rows: Vec<HealthRow> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| HealthRow {
            seq: (i + 1).to_string(),
            node: row.node.clone(),
            power: paint(&row.power),
            daemon: paint(&row.daemon),
            slurm: paint(&row.slurm),
            health: paint(&row.health),
        })
        .collect();

    let mut table = Table::new(table_rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    format!(
        "{}\n{}",
        "<< Health & Status of Nodes >>".cyan().bold(),
        table
    )
}

/// Render batched action outcomes, one `node: message` line per node in
/// submission order.
pub fn format_outcomes(outcomes: &ActionOutcomes) -> String {
    let mut lines = Vec::with_capacity(outcomes.len());
    for (node, outcome) in outcomes.iter() {
        let line = match outcome {
            NodeOutcome::Ok(message) => {
                format!("{}: {}", node, Category::Good.paint(message))
            }
            NodeOutcome::Failed(reason) => {
                format!("{}: {}", node, Category::Error.paint(reason))
            }
            NodeOutcome::Status(message) => {
                let category = classify_power_status(message, false);
                format!("{}: {}", node, category.paint(message))
            }
            NodeOutcome::Pending => {
                format!("{}: {}", node, Category::Unknown.paint("no result"))
            }
        };
        lines.push(line);
    }
    lines.join("\n")
}
