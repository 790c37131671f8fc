pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    composite_key, AttachmentRecord, AuthorizationRecord, CaseInstanceRecord, CaseInstanceState,
    DefinitionRecord, DeploymentRecord, EndReason, EventSubscriptionRecord, GroupRecord,
    InstanceKind, InstanceLinkRecord, MembershipRecord, ProcessInstanceRecord,
    ProcessInstanceState, Record, SubscriptionAction, TaskRecord, UserRecord, VariableRecord,
};
pub use traits::EngineStorage;
