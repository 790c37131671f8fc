//! procflow-model: definition resources deployed into a procflow engine.
//!
//! A deployment carries one JSON resource per definition. Each resource is
//! dispatched on its `kind` field (`Process` or `Case`) and parsed into a
//! typed [`Definition`]. [`validate_deployment`] checks the cross-definition
//! rules (unique keys, resolvable companion cases) before the engine
//! accepts a deployment.

pub mod deserialize;
pub mod types;
pub mod validate;

pub use deserialize::{from_resource, parse_resource, ModelError};
pub use types::*;
pub use validate::{validate_definition, validate_deployment};

/// JSON Schema for a single definition resource.
pub const DEFINITION_SCHEMA: &str = include_str!("../schema/definition.schema.json");
