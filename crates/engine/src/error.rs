use std::fmt;

use procflow_model::ModelError;
use procflow_storage::{CaseInstanceState, StorageError};

use crate::authorization::{Permission, Resource};

/// One permission a denied caller would have needed.
///
/// A denied check lists every alternative that would have let it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingAuthorization {
    pub permission: Permission,
    pub resource: Resource,
    pub resource_id: String,
}

impl fmt::Display for MissingAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} '{}'",
            self.permission, self.resource, self.resource_id
        )
    }
}

fn join_missing(missing: &[MissingAuthorization]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Errors surfaced by engine operations.
///
/// Every error aborts the command that raised it, so no partial change is
/// ever committed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("user '{user_id}' is not authorized: requires {}", join_missing(.missing))]
    Authorization {
        user_id: String,
        missing: Vec<MissingAuthorization>,
    },

    #[error("cannot correlate message '{message_name}': expected exactly one match, found {matched}")]
    MismatchingCorrelation { message_name: String, matched: usize },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("case instance '{case_instance_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        case_instance_id: String,
        from: CaseInstanceState,
        to: CaseInstanceState,
    },

    #[error("invalid definition: {0}")]
    Definition(#[from] ModelError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }

    /// True for a denied authorization check.
    pub fn is_authorization(&self) -> bool {
        matches!(self, EngineError::Authorization { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_message_lists_alternatives() {
        let err = EngineError::Authorization {
            user_id: "demo".to_string(),
            missing: vec![
                MissingAuthorization {
                    permission: Permission::Update,
                    resource: Resource::Task,
                    resource_id: "7".to_string(),
                },
                MissingAuthorization {
                    permission: Permission::UpdateTask,
                    resource: Resource::ProcessDefinition,
                    resource_id: "testProcess".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "user 'demo' is not authorized: requires UPDATE on TASK '7' \
             or UPDATE_TASK on PROCESS_DEFINITION 'testProcess'"
        );
        assert!(err.is_authorization());
    }

    #[test]
    fn storage_errors_convert() {
        let err: EngineError = StorageError::Backend("down".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_authorization());
    }
}
