//! Deserialization of definition resources into typed structs.
//!
//! The main entry point is [`from_resource`], which takes a
//! `&serde_json::Value` and produces a [`Definition`].

use crate::types::*;
use std::fmt;

/// Errors while reading or validating definition resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The resource is missing a required top-level field.
    MissingField { field: String },
    /// The `kind` field names no known definition kind.
    UnknownKind { kind: String },
    /// A definition is structurally invalid.
    InvalidDefinition { key: String, message: String },
    /// The resource bytes are not valid JSON.
    Json { resource: String, message: String },
    /// Two definitions in one deployment share a key.
    DuplicateKey { key: String },
    /// A process names a companion case that is neither deployed nor part
    /// of the same deployment.
    UnresolvedCompanionCase { process_key: String, case_key: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::MissingField { field } => {
                write!(f, "resource missing required field: '{}'", field)
            }
            ModelError::UnknownKind { kind } => {
                write!(f, "unknown definition kind: '{}'", kind)
            }
            ModelError::InvalidDefinition { key, message } => {
                write!(f, "definition '{}': {}", key, message)
            }
            ModelError::Json { resource, message } => {
                write!(f, "resource '{}' is not valid JSON: {}", resource, message)
            }
            ModelError::DuplicateKey { key } => {
                write!(f, "duplicate definition key '{}' in deployment", key)
            }
            ModelError::UnresolvedCompanionCase {
                process_key,
                case_key,
            } => {
                write!(
                    f,
                    "process '{}' names companion case '{}' which is not deployed",
                    process_key, case_key
                )
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Deserialize a definition resource.
///
/// Dispatches on the `kind` field, then hands the object to serde.
pub fn from_resource(resource: &serde_json::Value) -> Result<Definition, ModelError> {
    if !resource.is_object() {
        return Err(ModelError::InvalidDefinition {
            key: String::new(),
            message: "resource must be a JSON object".to_string(),
        });
    }
    let kind = required_str(resource, "kind")?;
    let key = required_str(resource, "key")?;

    match kind.parse::<DefinitionKind>() {
        Ok(DefinitionKind::Process) => serde_json::from_value::<ProcessModel>(resource.clone())
            .map(Definition::Process)
            .map_err(|e| invalid(&key, e)),
        Ok(DefinitionKind::Case) => serde_json::from_value::<CaseModel>(resource.clone())
            .map(Definition::Case)
            .map_err(|e| invalid(&key, e)),
        Err(()) => Err(ModelError::UnknownKind { kind }),
    }
}

/// Parse raw resource bytes. `resource_name` is only used in errors.
pub fn parse_resource(resource_name: &str, bytes: &[u8]) -> Result<Definition, ModelError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ModelError::Json {
            resource: resource_name.to_string(),
            message: e.to_string(),
        })?;
    from_resource(&value)
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn required_str(obj: &serde_json::Value, field: &str) -> Result<String, ModelError> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ModelError::MissingField {
            field: field.to_string(),
        })
}

fn invalid(key: &str, e: serde_json::Error) -> ModelError {
    ModelError::InvalidDefinition {
        key: key.to_string(),
        message: e.to_string(),
    }
}
