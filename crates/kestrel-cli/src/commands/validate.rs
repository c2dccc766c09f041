use super::run::{csv_field, load_suite};
use crate::OutputFormat;
use anyhow::Result;
use kestrel_core::suite::Suite;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuiteOutline {
    suite: String,
    base_url: Option<String>,
    setup_steps: usize,
    repetitions: usize,
    scenarios: Vec<ScenarioOutline>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioOutline {
    name: String,
    steps: usize,
    viewports: Vec<String>,
}

impl From<&Suite> for SuiteOutline {
    fn from(suite: &Suite) -> Self {
        Self {
            suite: suite.name.clone(),
            base_url: suite.base_url.clone(),
            setup_steps: suite.setup.len(),
            repetitions: suite.repetitions(),
            scenarios: suite
                .scenarios
                .iter()
                .map(|scenario| ScenarioOutline {
                    name: scenario.name.clone(),
                    steps: scenario.steps.len(),
                    viewports: scenario.viewports.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
        }
    }
}

/// Parse and validate a suite, then list what a run would execute
pub fn execute(path: &Path, format: OutputFormat) -> Result<()> {
    let suite = load_suite(path, None)?;
    let outline = SuiteOutline::from(&suite);

    match format {
        OutputFormat::Json => output_json(&outline)?,
        OutputFormat::Table => output_table(&outline),
        OutputFormat::Pretty => output_pretty(&outline),
    }

    Ok(())
}

fn output_pretty(outline: &SuiteOutline) {
    use console::style;

    println!(
        "\n{} {}",
        style("✓").green().bold(),
        style(format!("Suite '{}' is valid", outline.suite)).bold()
    );
    if let Some(ref base) = outline.base_url {
        println!("  Base URL:    {}", style(base).cyan());
    }
    println!("  Setup steps: {}", outline.setup_steps);
    println!(
        "  Scenarios:   {} ({} repetition(s))",
        style(outline.scenarios.len()).yellow(),
        outline.repetitions
    );
    println!();

    for scenario in &outline.scenarios {
        if scenario.viewports.is_empty() {
            println!("  • {} ({} steps)", scenario.name, scenario.steps);
        } else {
            println!(
                "  • {} ({} steps) at {}",
                scenario.name,
                scenario.steps,
                scenario.viewports.join(", ")
            );
        }
    }
    println!();
}

fn output_json(outline: &SuiteOutline) -> Result<()> {
    let json_str = serde_json::to_string_pretty(outline)?;
    println!("{}", json_str);
    Ok(())
}

fn output_table(outline: &SuiteOutline) {
    println!("Scenario,Steps,Viewports");
    for scenario in &outline.scenarios {
        println!(
            "{},{},{}",
            csv_field(&scenario.name),
            scenario.steps,
            scenario.viewports.join(" ")
        );
    }
}
