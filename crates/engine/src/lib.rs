//! procflow engine: identity, grant-based authorization, process and case
//! instances, user tasks and message correlation.
//!
//! Everything runs in process against an [`EngineStorage`] backend. Each
//! public operation is one command: it takes the engine's command lock,
//! opens a storage snapshot, and commits it only if the whole operation
//! succeeded. The caller's identity travels in a [`Session`]; a session
//! without authentication acts as the engine itself.
//!
//! ```ignore
//! let engine = ProcessEngine::in_memory(EngineConfig::default());
//! let system = Session::new();
//! engine
//!     .repository_service()
//!     .create_deployment()
//!     .name("demo")
//!     .add_json_resource("process.json", &process)
//!     .deploy(&system)?;
//! let pi = engine
//!     .runtime_service()
//!     .start_process_instance_by_key(&system, "testProcess", Variables::new())?;
//! ```

pub mod authorization;
pub mod case;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod identity;
mod lifecycle;
pub mod repository;
pub mod runtime;
pub mod task;

use std::collections::BTreeMap;

pub use authorization::{
    Authorization, AuthorizationGate, AuthorizationService, AuthorizationType, NewAuthorization,
    Permission, PermissionSet, Required, Resource, ANY,
};
pub use case::{CaseInstance, CaseInstanceQuery, CaseService};
pub use config::{ConfigError, EngineConfig};
pub use correlation::{CorrelationResult, CorrelationTarget, MessageCorrelationBuilder};
pub use engine::ProcessEngine;
pub use error::{EngineError, MissingAuthorization};
pub use identity::{Authentication, Group, IdentityService, NewGroup, NewUser, Session, User};
pub use repository::{DeployedDefinition, Deployment, DeploymentBuilder, RepositoryService};
pub use runtime::{ProcessInstance, ProcessInstanceQuery, RuntimeService};
pub use task::{Attachment, NewAttachment, Task, TaskQuery, TaskService};

pub use procflow_storage::{CaseInstanceState, EndReason, ProcessInstanceState};

/// Variables by name. Values are arbitrary JSON.
pub type Variables = BTreeMap<String, serde_json::Value>;
