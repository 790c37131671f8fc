//! Grant-based authorization.
//!
//! A grant gives a subject (a user, a group, or everyone for `GLOBAL`
//! grants) a set of permissions on one resource instance or on every
//! instance of a resource type (`*`). [`AuthorizationGate`] answers whether
//! an authentication holds a permission; protected operations call it
//! before they touch any state.

use std::fmt;
use std::str::FromStr;

use procflow_storage::{AuthorizationRecord, EngineStorage};
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::ProcessEngine;
use crate::error::{EngineError, MissingAuthorization};
use crate::identity::{require_group, require_user, Authentication, Session};

/// Resource id matching every instance of a resource type.
pub const ANY: &str = "*";

// ── Permissions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    Read,
    Update,
    Create,
    Delete,
    ReadTask,
    UpdateTask,
    CreateInstance,
    ReadInstance,
    UpdateInstance,
    DeleteInstance,
    TaskWork,
    All,
}

impl Permission {
    pub const NAMED: [Permission; 11] = [
        Permission::Read,
        Permission::Update,
        Permission::Create,
        Permission::Delete,
        Permission::ReadTask,
        Permission::UpdateTask,
        Permission::CreateInstance,
        Permission::ReadInstance,
        Permission::UpdateInstance,
        Permission::DeleteInstance,
        Permission::TaskWork,
    ];

    pub fn bits(self) -> u32 {
        match self {
            Permission::Read => 2,
            Permission::Update => 4,
            Permission::Create => 8,
            Permission::Delete => 16,
            Permission::ReadTask => 64,
            Permission::UpdateTask => 128,
            Permission::CreateInstance => 256,
            Permission::ReadInstance => 512,
            Permission::UpdateInstance => 1024,
            Permission::DeleteInstance => 2048,
            Permission::TaskWork => 16384,
            Permission::All => u32::MAX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Update => "UPDATE",
            Permission::Create => "CREATE",
            Permission::Delete => "DELETE",
            Permission::ReadTask => "READ_TASK",
            Permission::UpdateTask => "UPDATE_TASK",
            Permission::CreateInstance => "CREATE_INSTANCE",
            Permission::ReadInstance => "READ_INSTANCE",
            Permission::UpdateInstance => "UPDATE_INSTANCE",
            Permission::DeleteInstance => "DELETE_INSTANCE",
            Permission::TaskWork => "TASK_WORK",
            Permission::All => "ALL",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "ALL" {
            return Ok(Permission::All);
        }
        Permission::NAMED
            .into_iter()
            .find(|p| p.as_str() == value)
            .ok_or(())
    }
}

/// A set of permissions, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PermissionSet(u32);

impl PermissionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn add(&mut self, permission: Permission) {
        self.0 |= permission.bits();
    }

    pub fn remove(&mut self, permission: Permission) {
        self.0 &= !permission.bits();
    }

    pub fn contains(self, permission: Permission) -> bool {
        let bits = permission.bits();
        self.0 & bits == bits
    }

    /// The named permissions in the set; `[All]` when every bit is set.
    pub fn permissions(self) -> Vec<Permission> {
        if self.0 == u32::MAX {
            return vec![Permission::All];
        }
        Permission::NAMED
            .into_iter()
            .filter(|p| self.contains(*p))
            .collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::empty();
        for p in iter {
            set.add(p);
        }
        set
    }
}

// ── Resources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    ProcessDefinition,
    ProcessInstance,
    Task,
    CaseInstance,
    Deployment,
    User,
    Group,
    GroupMembership,
    Authorization,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::ProcessDefinition => "PROCESS_DEFINITION",
            Resource::ProcessInstance => "PROCESS_INSTANCE",
            Resource::Task => "TASK",
            Resource::CaseInstance => "CASE_INSTANCE",
            Resource::Deployment => "DEPLOYMENT",
            Resource::User => "USER",
            Resource::Group => "GROUP",
            Resource::GroupMembership => "GROUP_MEMBERSHIP",
            Resource::Authorization => "AUTHORIZATION",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PROCESS_DEFINITION" => Ok(Resource::ProcessDefinition),
            "PROCESS_INSTANCE" => Ok(Resource::ProcessInstance),
            "TASK" => Ok(Resource::Task),
            "CASE_INSTANCE" => Ok(Resource::CaseInstance),
            "DEPLOYMENT" => Ok(Resource::Deployment),
            "USER" => Ok(Resource::User),
            "GROUP" => Ok(Resource::Group),
            "GROUP_MEMBERSHIP" => Ok(Resource::GroupMembership),
            "AUTHORIZATION" => Ok(Resource::Authorization),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationType {
    /// Applies to every subject.
    Global,
    /// Applies to one user or one group.
    Grant,
}

impl AuthorizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthorizationType::Global => "GLOBAL",
            AuthorizationType::Grant => "GRANT",
        }
    }
}

impl fmt::Display for AuthorizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GLOBAL" => Ok(AuthorizationType::Global),
            "GRANT" => Ok(AuthorizationType::Grant),
            _ => Err(()),
        }
    }
}

// ── The gate ────────────────────────────────────────────────────────

/// A permission on a resource instance that an operation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Required {
    pub permission: Permission,
    pub resource: Resource,
    pub resource_id: String,
}

impl Required {
    pub fn new(permission: Permission, resource: Resource, resource_id: impl Into<String>) -> Self {
        Self {
            permission,
            resource,
            resource_id: resource_id.into(),
        }
    }
}

impl From<&Required> for MissingAuthorization {
    fn from(r: &Required) -> Self {
        MissingAuthorization {
            permission: r.permission,
            resource: r.resource,
            resource_id: r.resource_id.clone(),
        }
    }
}

/// Decides whether an authentication holds a permission, given the grants.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationGate<'a> {
    enabled: bool,
    config: &'a EngineConfig,
}

impl<'a> AuthorizationGate<'a> {
    pub fn new(enabled: bool, config: &'a EngineConfig) -> Self {
        Self { enabled, config }
    }

    /// True when no grant lookup is needed: checks are off, the caller is
    /// the engine itself, or the caller is an administrator.
    pub fn bypasses(&self, auth: Option<&Authentication>) -> bool {
        let Some(auth) = auth else {
            return true;
        };
        !self.enabled
            || self.config.admin_users.contains(&auth.user_id)
            || auth
                .group_ids
                .iter()
                .any(|g| self.config.admin_groups.contains(g))
    }

    pub fn check(
        &self,
        auth: Option<&Authentication>,
        grants: &[AuthorizationRecord],
        resource: Resource,
        resource_id: &str,
        permission: Permission,
    ) -> bool {
        if self.bypasses(auth) {
            return true;
        }
        let Some(user) = auth else {
            return true;
        };
        grants.iter().any(|grant| {
            applies_to(grant, user)
                && grant.resource_type == resource.as_str()
                && (grant.resource_id == ANY || grant.resource_id == resource_id)
                && PermissionSet::from_bits(grant.permissions).contains(permission)
        })
    }

    /// Succeeds when any of `required` is granted.
    pub fn check_any(
        &self,
        auth: Option<&Authentication>,
        grants: &[AuthorizationRecord],
        required: &[Required],
    ) -> Result<(), EngineError> {
        let granted = required
            .iter()
            .any(|r| self.check(auth, grants, r.resource, &r.resource_id, r.permission));
        if granted {
            return Ok(());
        }
        Err(EngineError::Authorization {
            user_id: auth.map(|a| a.user_id.clone()).unwrap_or_default(),
            missing: required.iter().map(MissingAuthorization::from).collect(),
        })
    }
}

fn applies_to(grant: &AuthorizationRecord, auth: &Authentication) -> bool {
    if grant.auth_type == AuthorizationType::Global.as_str() {
        return true;
    }
    if grant.user_id.as_deref() == Some(auth.user_id.as_str()) {
        return true;
    }
    grant
        .group_id
        .as_ref()
        .is_some_and(|g| auth.group_ids.contains(g))
}

// ── Grants ──────────────────────────────────────────────────────────

/// A saved grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub id: String,
    pub auth_type: AuthorizationType,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub resource: Resource,
    pub resource_id: String,
    pub permissions: PermissionSet,
}

impl Authorization {
    pub fn is_permission_granted(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    fn from_record(r: AuthorizationRecord) -> Result<Self, EngineError> {
        let auth_type = r.auth_type.parse().map_err(|()| {
            EngineError::invalid(format!("stored authorization '{}' has type '{}'", r.id, r.auth_type))
        })?;
        let resource = r.resource_type.parse().map_err(|()| {
            EngineError::invalid(format!(
                "stored authorization '{}' has resource type '{}'",
                r.id, r.resource_type
            ))
        })?;
        Ok(Self {
            id: r.id,
            auth_type,
            user_id: r.user_id,
            group_id: r.group_id,
            resource,
            resource_id: r.resource_id,
            permissions: PermissionSet::from_bits(r.permissions),
        })
    }
}

/// A grant being built; saved with [`AuthorizationService::save_authorization`].
#[derive(Debug, Clone)]
pub struct NewAuthorization {
    auth_type: AuthorizationType,
    user_id: Option<String>,
    group_id: Option<String>,
    resource: Option<Resource>,
    resource_id: String,
    permissions: PermissionSet,
}

impl NewAuthorization {
    pub fn new(auth_type: AuthorizationType) -> Self {
        Self {
            auth_type,
            user_id: None,
            group_id: None,
            resource: None,
            resource_id: ANY.to_string(),
            permissions: PermissionSet::empty(),
        }
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Defaults to [`ANY`].
    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }

    pub fn add_permission(mut self, permission: Permission) -> Self {
        self.permissions.add(permission);
        self
    }

    pub fn permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions = permissions.iter().copied().collect();
        self
    }
}

/// Stores grants and answers authorization questions.
pub struct AuthorizationService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> AuthorizationService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    pub fn create_new_authorization(&self, auth_type: AuthorizationType) -> NewAuthorization {
        NewAuthorization::new(auth_type)
    }

    pub fn save_authorization(
        &self,
        session: &Session,
        new: NewAuthorization,
    ) -> Result<Authorization, EngineError> {
        let resource = new
            .resource
            .ok_or_else(|| EngineError::invalid("authorization has no resource type"))?;
        if new.permissions.is_empty() {
            return Err(EngineError::invalid("authorization grants no permission"));
        }
        if new.resource_id.is_empty() {
            return Err(EngineError::invalid("authorization has an empty resource id"));
        }
        let (user_id, group_id) = match (new.auth_type, &new.user_id, &new.group_id) {
            (AuthorizationType::Global, None, None) => (Some(ANY.to_string()), None),
            (AuthorizationType::Global, _, _) => {
                return Err(EngineError::invalid(
                    "a global authorization cannot name a user or group",
                ))
            }
            (AuthorizationType::Grant, Some(u), None) if u == ANY => {
                return Err(EngineError::invalid(
                    "a grant cannot name every user; use a global authorization",
                ))
            }
            (AuthorizationType::Grant, None, Some(g)) if g == ANY => {
                return Err(EngineError::invalid(
                    "a grant cannot name every group; use a global authorization",
                ))
            }
            (AuthorizationType::Grant, Some(u), None) => (Some(u.clone()), None),
            (AuthorizationType::Grant, None, Some(g)) => (None, Some(g.clone())),
            (AuthorizationType::Grant, _, _) => {
                return Err(EngineError::invalid(
                    "an authorization needs exactly one of user id or group id",
                ))
            }
        };

        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(
                Permission::Create,
                Resource::Authorization,
                ANY,
            )])?;
            if new.auth_type == AuthorizationType::Grant {
                match (&user_id, &group_id) {
                    (Some(u), None) => {
                        require_user(ctx, u)?;
                    }
                    (None, Some(g)) => {
                        require_group(ctx, g)?;
                    }
                    _ => {}
                }
            }
            let record = AuthorizationRecord {
                id: ctx.next_id(),
                auth_type: new.auth_type.as_str().to_string(),
                user_id: user_id.clone(),
                group_id: group_id.clone(),
                resource_type: resource.as_str().to_string(),
                resource_id: new.resource_id.clone(),
                permissions: new.permissions.bits(),
            };
            ctx.insert(&record)?;
            debug!(
                authorization_id = %record.id,
                resource = %resource,
                resource_id = %record.resource_id,
                "authorization saved"
            );
            Authorization::from_record(record)
        })
    }

    pub fn delete_authorization(
        &self,
        session: &Session,
        authorization_id: &str,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(
                Permission::Delete,
                Resource::Authorization,
                authorization_id,
            )])?;
            ctx.require::<AuthorizationRecord>("authorization", authorization_id)?;
            ctx.delete::<AuthorizationRecord>(authorization_id)
        })
    }

    /// Grants whose subject is `user_id` or one of `group_ids`, plus all
    /// global grants.
    pub fn authorizations_for(
        &self,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<Authorization>, EngineError> {
        let auth = Authentication::new(user_id, group_ids.iter().cloned());
        self.engine.execute(&Session::new(), |ctx| {
            ctx.scan_where::<AuthorizationRecord>(|g| applies_to(g, &auth))?
                .into_iter()
                .map(Authorization::from_record)
                .collect()
        })
    }

    /// Whether the user, with the given groups, holds `permission` on the
    /// resource instance. Answers as the gate would for that user.
    pub fn is_user_authorized(
        &self,
        user_id: &str,
        group_ids: &[String],
        permission: Permission,
        resource: Resource,
        resource_id: &str,
    ) -> Result<bool, EngineError> {
        let session = Session::authenticated(Authentication::new(user_id, group_ids.iter().cloned()));
        self.engine.execute(&session, |ctx| {
            ctx.is_visible(&[Required::new(permission, resource, resource_id)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(
        user: Option<&str>,
        group: Option<&str>,
        resource: Resource,
        id: &str,
        perms: &[Permission],
    ) -> AuthorizationRecord {
        AuthorizationRecord {
            id: "1".to_string(),
            auth_type: "GRANT".to_string(),
            user_id: user.map(str::to_string),
            group_id: group.map(str::to_string),
            resource_type: resource.as_str().to_string(),
            resource_id: id.to_string(),
            permissions: perms.iter().copied().collect::<PermissionSet>().bits(),
        }
    }

    fn demo() -> Authentication {
        Authentication::new("demo", ["accounting"])
    }

    #[test]
    fn permission_string_roundtrip() {
        for p in Permission::NAMED.into_iter().chain([Permission::All]) {
            assert_eq!(p.as_str().parse::<Permission>(), Ok(p));
            assert_eq!(p.to_string(), p.as_str());
        }
        assert!("WRITE".parse::<Permission>().is_err());
    }

    #[test]
    fn resource_string_roundtrip() {
        for r in [
            Resource::ProcessDefinition,
            Resource::ProcessInstance,
            Resource::Task,
            Resource::CaseInstance,
            Resource::Deployment,
            Resource::User,
            Resource::Group,
            Resource::GroupMembership,
            Resource::Authorization,
        ] {
            assert_eq!(r.as_str().parse::<Resource>(), Ok(r));
        }
    }

    #[test]
    fn all_contains_every_permission() {
        let set: PermissionSet = [Permission::All].into_iter().collect();
        assert!(Permission::NAMED.into_iter().all(|p| set.contains(p)));
        assert_eq!(set.permissions(), vec![Permission::All]);
    }

    #[test]
    fn set_lists_named_permissions() {
        let mut set: PermissionSet = [Permission::Read, Permission::CreateInstance]
            .into_iter()
            .collect();
        assert_eq!(set.bits(), 2 | 256);
        assert!(!set.contains(Permission::All));
        set.remove(Permission::Read);
        assert_eq!(set.permissions(), vec![Permission::CreateInstance]);
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(false, &config);
        assert!(gate.check(Some(&demo()), &[], Resource::Task, "1", Permission::Update));
    }

    #[test]
    fn missing_authentication_allows_everything() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(true, &config);
        assert!(gate.check(None, &[], Resource::Task, "1", Permission::Update));
    }

    #[test]
    fn group_grant_with_any_matches_every_id() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(true, &config);
        let grants = [grant(
            None,
            Some("accounting"),
            Resource::ProcessInstance,
            ANY,
            &[Permission::Create],
        )];
        for id in ["1", "42", "anything"] {
            assert!(gate.check(
                Some(&demo()),
                &grants,
                Resource::ProcessInstance,
                id,
                Permission::Create
            ));
        }
        assert!(!gate.check(
            Some(&demo()),
            &grants,
            Resource::ProcessInstance,
            "1",
            Permission::Delete
        ));
    }

    #[test]
    fn grant_is_scoped_to_resource_type_and_id() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(true, &config);
        let grants = [grant(
            Some("demo"),
            None,
            Resource::Task,
            "7",
            &[Permission::Update],
        )];
        let auth = demo();
        assert!(gate.check(Some(&auth), &grants, Resource::Task, "7", Permission::Update));
        assert!(!gate.check(Some(&auth), &grants, Resource::Task, "8", Permission::Update));
        assert!(!gate.check(
            Some(&auth),
            &grants,
            Resource::ProcessInstance,
            "7",
            Permission::Update
        ));
        let other = Authentication::new("mary", Vec::<String>::new());
        assert!(!gate.check(Some(&other), &grants, Resource::Task, "7", Permission::Update));
    }

    #[test]
    fn global_grant_applies_to_everyone() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(true, &config);
        let mut global = grant(Some(ANY), None, Resource::Task, ANY, &[Permission::Read]);
        global.auth_type = "GLOBAL".to_string();
        let anyone = Authentication::new("mary", Vec::<String>::new());
        assert!(gate.check(Some(&anyone), &[global], Resource::Task, "3", Permission::Read));
    }

    #[test]
    fn admin_group_bypasses_checks() {
        let config = EngineConfig {
            admin_groups: vec!["accounting".to_string()],
            ..EngineConfig::default()
        };
        let gate = AuthorizationGate::new(true, &config);
        assert!(gate.bypasses(Some(&demo())));
        assert!(gate.check(Some(&demo()), &[], Resource::Task, "1", Permission::Delete));
    }

    #[test]
    fn check_any_reports_every_alternative() {
        let config = EngineConfig::default();
        let gate = AuthorizationGate::new(true, &config);
        let required = [
            Required::new(Permission::Update, Resource::Task, "7"),
            Required::new(Permission::UpdateTask, Resource::ProcessDefinition, "p"),
        ];
        match gate.check_any(Some(&demo()), &[], &required) {
            Err(EngineError::Authorization { user_id, missing }) => {
                assert_eq!(user_id, "demo");
                assert_eq!(missing.len(), 2);
                assert_eq!(missing[1].resource, Resource::ProcessDefinition);
            }
            other => panic!("expected authorization error, got {other:?}"),
        }
    }
}
