use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A row type stored by an [`EngineStorage`](crate::EngineStorage) backend.
///
/// Each record type lives in its own table and is addressed by a string key
/// derived from the record itself.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn key(&self) -> String;
}

/// Join the parts of a composite key.
///
/// Parts are separated by U+001F so ids containing `:` or `/` cannot collide.
pub fn composite_key(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}

// ── Identity ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl Record for UserRecord {
    const TABLE: &'static str = "users";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
}

impl Record for GroupRecord {
    const TABLE: &'static str = "groups";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub user_id: String,
    pub group_id: String,
}

impl Record for MembershipRecord {
    const TABLE: &'static str = "memberships";

    fn key(&self) -> String {
        composite_key(&[&self.user_id, &self.group_id])
    }
}

/// A stored grant. Resource types and authorization types are kept in their
/// canonical string form; permissions are a bitmask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub id: String,
    pub auth_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub resource_type: String,
    pub resource_id: String,
    pub permissions: u32,
}

impl Record for AuthorizationRecord {
    const TABLE: &'static str = "authorizations";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ── Repository ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub name: String,
    /// Hex SHA-256 over the deployment's resources.
    pub checksum: String,
    /// Monotonic position among deployments; later deployments are larger.
    pub sequence: u64,
    pub definition_ids: Vec<String>,
}

impl Record for DeploymentRecord {
    const TABLE: &'static str = "deployments";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    /// `key:version:deployment_id`
    pub id: String,
    pub key: String,
    pub version: u32,
    /// `"Process"` or `"Case"`.
    pub kind: String,
    pub deployment_id: String,
    /// The definition model as deployed.
    pub model: serde_json::Value,
}

impl Record for DefinitionRecord {
    const TABLE: &'static str = "definitions";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceState {
    Active,
    Ended,
}

/// Why a process instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// Its last task completed, or its case completed.
    Completed,
    /// Deleted through the runtime service.
    Deleted,
    /// Closed by a correlated message or by its case being terminated.
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceRecord {
    pub id: String,
    pub definition_id: String,
    pub definition_key: String,
    pub state: ProcessInstanceState,
    pub end_reason: Option<EndReason>,
    pub delete_reason: Option<String>,
}

impl Record for ProcessInstanceRecord {
    const TABLE: &'static str = "process_instances";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseInstanceState {
    Active,
    Completed,
    Terminated,
}

impl CaseInstanceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CaseInstanceState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseInstanceState::Active => "ACTIVE",
            CaseInstanceState::Completed => "COMPLETED",
            CaseInstanceState::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for CaseInstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseInstanceRecord {
    pub id: String,
    pub definition_id: String,
    pub definition_key: String,
    pub process_instance_id: Option<String>,
    pub state: CaseInstanceState,
}

impl Record for CaseInstanceRecord {
    const TABLE: &'static str = "case_instances";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Directed link from a process instance to its companion case, fixed at
/// creation time. Keyed by the process instance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLinkRecord {
    pub process_instance_id: String,
    pub case_instance_id: String,
}

impl Record for InstanceLinkRecord {
    const TABLE: &'static str = "instance_links";

    fn key(&self) -> String {
        self.process_instance_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: Option<String>,
    pub task_definition_key: String,
    pub execution_id: String,
    pub process_instance_id: String,
    pub process_definition_key: String,
    /// Creation order within the engine.
    pub sequence: u64,
}

impl Record for TaskRecord {
    const TABLE: &'static str = "tasks";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// A variable bound to a scope: a process instance id or a task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub scope_id: String,
    pub name: String,
    pub value: serde_json::Value,
}

impl Record for VariableRecord {
    const TABLE: &'static str = "variables";

    fn key(&self) -> String {
        composite_key(&[&self.scope_id, &self.name])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: String,
    pub attachment_type: String,
    pub task_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl Record for AttachmentRecord {
    const TABLE: &'static str = "attachments";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Process,
    Case,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Terminate,
    Complete,
}

/// An active instance waiting on a named message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscriptionRecord {
    pub id: String,
    pub message_name: String,
    pub target_kind: InstanceKind,
    pub target_id: String,
    pub action: SubscriptionAction,
}

impl Record for EventSubscriptionRecord {
    const TABLE: &'static str = "event_subscriptions";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys_do_not_collide_on_separators() {
        let a = MembershipRecord {
            user_id: "a:b".to_string(),
            group_id: "c".to_string(),
        };
        let b = MembershipRecord {
            user_id: "a".to_string(),
            group_id: "b:c".to_string(),
        };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn states_serialize_in_upper_case() {
        assert_eq!(
            serde_json::to_value(CaseInstanceState::Terminated).unwrap(),
            serde_json::json!("TERMINATED")
        );
        assert!(CaseInstanceState::Completed.is_terminal());
        assert!(!CaseInstanceState::Active.is_terminal());
    }
}
