//! Semantic checks on definitions that the JSON shape alone cannot express.

use std::collections::BTreeSet;

use crate::deserialize::ModelError;
use crate::types::Definition;

/// Check a single definition in isolation.
///
/// Returns every problem found rather than stopping at the first.
pub fn validate_definition(def: &Definition) -> Vec<ModelError> {
    let mut errors = Vec::new();
    let key = def.key();

    if key.trim().is_empty() {
        errors.push(ModelError::InvalidDefinition {
            key: key.to_string(),
            message: "key must not be empty".to_string(),
        });
    }

    let mut message_names = BTreeSet::new();
    for message in def.messages() {
        if message.name.trim().is_empty() {
            errors.push(ModelError::InvalidDefinition {
                key: key.to_string(),
                message: "message name must not be empty".to_string(),
            });
        } else if !message_names.insert(message.name.as_str()) {
            errors.push(ModelError::InvalidDefinition {
                key: key.to_string(),
                message: format!("message '{}' declared twice", message.name),
            });
        }
    }

    if let Some(process) = def.as_process() {
        let mut task_keys = BTreeSet::new();
        for task in &process.tasks {
            if task.key.trim().is_empty() {
                errors.push(ModelError::InvalidDefinition {
                    key: key.to_string(),
                    message: "task key must not be empty".to_string(),
                });
            } else if !task_keys.insert(task.key.as_str()) {
                errors.push(ModelError::InvalidDefinition {
                    key: key.to_string(),
                    message: format!("task '{}' declared twice", task.key),
                });
            }
        }
        if process.companion_case.as_deref() == Some("") {
            errors.push(ModelError::InvalidDefinition {
                key: key.to_string(),
                message: "companion_case must not be empty".to_string(),
            });
        }
    }

    errors
}

/// Check a whole deployment.
///
/// `deployed_case_keys` holds the keys of case definitions already deployed
/// to the engine; a companion case must resolve either there or within
/// `definitions`.
pub fn validate_deployment(
    definitions: &[Definition],
    deployed_case_keys: &BTreeSet<String>,
) -> Result<(), Vec<ModelError>> {
    let mut errors: Vec<ModelError> = definitions.iter().flat_map(validate_definition).collect();

    let mut seen = BTreeSet::new();
    for def in definitions {
        if !seen.insert(def.key()) {
            errors.push(ModelError::DuplicateKey {
                key: def.key().to_string(),
            });
        }
    }

    let local_cases: BTreeSet<&str> = definitions
        .iter()
        .filter_map(|d| d.as_case())
        .map(|c| c.key.as_str())
        .collect();

    for process in definitions.iter().filter_map(|d| d.as_process()) {
        if let Some(case_key) = process.companion_case.as_deref() {
            if case_key.is_empty() {
                continue;
            }
            if !local_cases.contains(case_key) && !deployed_case_keys.contains(case_key) {
                errors.push(ModelError::UnresolvedCompanionCase {
                    process_key: process.key.clone(),
                    case_key: case_key.to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_resource;
    use serde_json::json;

    fn def(value: serde_json::Value) -> Definition {
        from_resource(&value).unwrap()
    }

    #[test]
    fn companion_case_in_same_deployment_resolves() {
        let defs = vec![
            def(json!({ "kind": "Process", "key": "p", "companion_case": "c" })),
            def(json!({ "kind": "Case", "key": "c" })),
        ];
        assert!(validate_deployment(&defs, &BTreeSet::new()).is_ok());
    }

    #[test]
    fn companion_case_already_deployed_resolves() {
        let defs = vec![def(
            json!({ "kind": "Process", "key": "p", "companion_case": "c" }),
        )];
        let deployed = BTreeSet::from(["c".to_string()]);
        assert!(validate_deployment(&defs, &deployed).is_ok());
    }

    #[test]
    fn unresolved_companion_case() {
        let defs = vec![def(
            json!({ "kind": "Process", "key": "p", "companion_case": "missing" }),
        )];
        let errors = validate_deployment(&defs, &BTreeSet::new()).unwrap_err();
        assert_eq!(
            errors,
            vec![ModelError::UnresolvedCompanionCase {
                process_key: "p".to_string(),
                case_key: "missing".to_string()
            }]
        );
    }

    #[test]
    fn duplicate_keys_and_tasks_are_all_reported() {
        let defs = vec![
            def(json!({
                "kind": "Process",
                "key": "p",
                "tasks": [{ "key": "t" }, { "key": "t" }]
            })),
            def(json!({ "kind": "Case", "key": "p" })),
        ];
        let errors = validate_deployment(&defs, &BTreeSet::new()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ModelError::DuplicateKey {
            key: "p".to_string()
        }));
    }

    #[test]
    fn empty_message_name_is_invalid() {
        let errors = validate_definition(&def(json!({
            "kind": "Case",
            "key": "c",
            "messages": [{ "name": " ", "action": "complete" }]
        })));
        assert_eq!(errors.len(), 1);
    }
}
