use std::path::Path;
use std::process;

use procflow_engine::EngineConfig;
use tracing::info;

use crate::scenario::{Scenario, ScenarioRunner, StepReport};
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_run(
    scenario_path: &Path,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = match config_path {
        Some(path) => match EngineConfig::from_path(path) {
            Ok(c) => c,
            Err(e) => {
                report_error(&e.to_string(), output, quiet);
                process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let scenario = match Scenario::from_path(scenario_path) {
        Ok(s) => s,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    };
    let name = scenario
        .name
        .clone()
        .unwrap_or_else(|| scenario_path.display().to_string());
    let base_dir = scenario_path.parent().unwrap_or_else(|| Path::new("."));

    let mut runner = ScenarioRunner::new(config);
    match runner.run(&scenario, base_dir) {
        Ok(steps) => {
            info!(scenario = %name, steps = steps.len(), "scenario passed");
            if quiet {
                return;
            }
            match output {
                OutputFormat::Text => {
                    for step in &steps {
                        println!("{}", describe(step));
                    }
                    println!("scenario '{}' passed ({} steps)", name, steps.len());
                }
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "scenario": name,
                        "passed": true,
                        "steps": steps,
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json).unwrap_or_default()
                    );
                }
            }
        }
        Err(e) => {
            report_error(&format!("scenario '{}' failed: {}", name, e), output, quiet);
            process::exit(1);
        }
    }
}

fn describe(step: &StepReport) -> String {
    match (&step.expected_error, &step.error, &step.result) {
        (Some(kind), Some(err), _) => {
            format!("  [{}] {}: failed as expected ({}): {}", step.index, step.op, kind, err)
        }
        (_, _, Some(result)) => format!("  [{}] {}: ok ({})", step.index, step.op, result),
        _ => format!("  [{}] {}: ok", step.index, step.op),
    }
}
