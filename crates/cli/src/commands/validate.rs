use std::collections::BTreeSet;
use std::path::Path;
use std::process;

use procflow_model::{from_resource, validate_definition, validate_deployment, Definition};

use crate::{report_error, OutputFormat};

/// Outcome of validating one resource file.
struct ResourceReport {
    path: String,
    definition: Option<Definition>,
    errors: Vec<String>,
}

pub(crate) fn cmd_validate(paths: &[impl AsRef<Path>], output: OutputFormat, quiet: bool) {
    let schema: serde_json::Value = match serde_json::from_str(procflow_model::DEFINITION_SCHEMA) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!(
                "internal error: failed to parse embedded definition schema: {}",
                e
            );
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("internal error: failed to compile schema: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let mut report = ResourceReport {
            path: path.display().to_string(),
            definition: None,
            errors: Vec::new(),
        };

        let doc = match std::fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(v) => v,
                Err(e) => {
                    report.errors.push(format!("error parsing JSON: {}", e));
                    reports.push(report);
                    continue;
                }
            },
            Err(e) => {
                report.errors.push(format!("error reading file: {}", e));
                reports.push(report);
                continue;
            }
        };

        report.errors.extend(validator.iter_errors(&doc).map(|e| format!("{}", e)));
        if report.errors.is_empty() {
            match from_resource(&doc) {
                Ok(def) => {
                    report
                        .errors
                        .extend(validate_definition(&def).iter().map(ToString::to_string));
                    report.definition = Some(def);
                }
                Err(e) => report.errors.push(e.to_string()),
            }
        }
        reports.push(report);
    }

    // Cross-resource rules only make sense once every file parsed.
    let mut deployment_errors = Vec::new();
    if reports.iter().all(|r| r.errors.is_empty()) {
        let definitions: Vec<Definition> =
            reports.iter().filter_map(|r| r.definition.clone()).collect();
        if let Err(errors) = validate_deployment(&definitions, &BTreeSet::new()) {
            deployment_errors = errors.iter().map(ToString::to_string).collect();
        }
    }

    let valid = deployment_errors.is_empty() && reports.iter().all(|r| r.errors.is_empty());

    match output {
        OutputFormat::Text => {
            if !quiet {
                for r in &reports {
                    if r.errors.is_empty() {
                        println!("{}: valid", r.path);
                    } else {
                        eprintln!("{}: invalid", r.path);
                        for err in &r.errors {
                            eprintln!("  - {}", err);
                        }
                    }
                }
                if !deployment_errors.is_empty() {
                    eprintln!("invalid deployment");
                    for err in &deployment_errors {
                        eprintln!("  - {}", err);
                    }
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "valid": valid,
                "resources": reports
                    .iter()
                    .map(|r| serde_json::json!({
                        "path": r.path,
                        "valid": r.errors.is_empty(),
                        "kind": r.definition.as_ref().map(|d| d.kind().as_str()),
                        "key": r.definition.as_ref().map(|d| d.key().to_string()),
                        "errors": r.errors,
                    }))
                    .collect::<Vec<_>>(),
                "errors": deployment_errors,
            });
            let pretty = serde_json::to_string_pretty(&json).unwrap_or_default();
            if valid {
                println!("{}", pretty);
            } else {
                eprintln!("{}", pretty);
            }
        }
    }

    if !valid {
        process::exit(1);
    }
}
