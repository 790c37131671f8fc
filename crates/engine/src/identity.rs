//! Users, groups and memberships, and the session that carries who is
//! calling.

use procflow_storage::{
    composite_key, AuthorizationRecord, EngineStorage, GroupRecord, MembershipRecord, Record,
    UserRecord,
};
use tracing::{debug, info};

use crate::authorization::{Permission, Required, Resource, ANY};
use crate::engine::{CommandContext, ProcessEngine};
use crate::error::EngineError;

/// An authenticated subject: a user and the groups it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub user_id: String,
    pub group_ids: Vec<String>,
}

impl Authentication {
    pub fn new<I, G>(user_id: impl Into<String>, group_ids: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            group_ids: group_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// The caller's unit of work.
///
/// A session without authentication is the engine acting on its own
/// behalf; authorization checks do not apply to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    authentication: Option<Authentication>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticated(authentication: Authentication) -> Self {
        Self {
            authentication: Some(authentication),
        }
    }

    pub fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = Some(authentication);
    }

    pub fn clear_authentication(&mut self) {
        self.authentication = None;
    }

    pub fn current_authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl From<UserRecord> for User {
    fn from(r: UserRecord) -> Self {
        Self {
            id: r.id,
            display_name: r.display_name,
            email: r.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
}

impl From<GroupRecord> for Group {
    fn from(r: GroupRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
        }
    }
}

/// A user to be created. The display name defaults to the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    id: String,
    display_name: Option<String>,
    email: Option<String>,
}

impl NewUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A group to be created. The name defaults to the id.
#[derive(Debug, Clone)]
pub struct NewGroup {
    id: String,
    name: Option<String>,
}

impl NewGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

fn check_id(kind: &str, id: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::invalid(format!("{kind} id must not be empty")));
    }
    if id == ANY {
        return Err(EngineError::invalid(format!(
            "'{ANY}' is reserved and cannot be a {kind} id"
        )));
    }
    Ok(())
}

pub(crate) fn require_user<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    user_id: &str,
) -> Result<UserRecord, EngineError> {
    ctx.require("user", user_id)
}

pub(crate) fn require_group<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    group_id: &str,
) -> Result<GroupRecord, EngineError> {
    ctx.require("group", group_id)
}

/// Users, groups and memberships.
pub struct IdentityService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> IdentityService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    pub fn create_user(&self, session: &Session, new: NewUser) -> Result<User, EngineError> {
        check_id("user", &new.id)?;
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(Permission::Create, Resource::User, ANY)])?;
            if ctx.get::<UserRecord>(&new.id)?.is_some() {
                return Err(EngineError::AlreadyExists {
                    kind: "user",
                    id: new.id.clone(),
                });
            }
            let record = UserRecord {
                display_name: new.display_name.clone().unwrap_or_else(|| new.id.clone()),
                id: new.id.clone(),
                email: new.email.clone(),
            };
            ctx.insert(&record)?;
            debug!(user_id = %record.id, "user created");
            Ok(record.into())
        })
    }

    pub fn create_group(&self, session: &Session, new: NewGroup) -> Result<Group, EngineError> {
        check_id("group", &new.id)?;
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(Permission::Create, Resource::Group, ANY)])?;
            if ctx.get::<GroupRecord>(&new.id)?.is_some() {
                return Err(EngineError::AlreadyExists {
                    kind: "group",
                    id: new.id.clone(),
                });
            }
            let record = GroupRecord {
                name: new.name.clone().unwrap_or_else(|| new.id.clone()),
                id: new.id.clone(),
            };
            ctx.insert(&record)?;
            debug!(group_id = %record.id, "group created");
            Ok(record.into())
        })
    }

    pub fn create_membership(
        &self,
        session: &Session,
        user_id: &str,
        group_id: &str,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(
                Permission::Create,
                Resource::GroupMembership,
                ANY,
            )])?;
            require_user(ctx, user_id)?;
            require_group(ctx, group_id)?;
            let record = MembershipRecord {
                user_id: user_id.to_string(),
                group_id: group_id.to_string(),
            };
            if ctx.get::<MembershipRecord>(&record.key())?.is_some() {
                return Err(EngineError::AlreadyExists {
                    kind: "membership",
                    id: format!("{user_id}/{group_id}"),
                });
            }
            ctx.insert(&record)?;
            debug!(user_id, group_id, "membership created");
            Ok(())
        })
    }

    pub fn delete_membership(
        &self,
        session: &Session,
        user_id: &str,
        group_id: &str,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(
                Permission::Delete,
                Resource::GroupMembership,
                group_id,
            )])?;
            let key = composite_key(&[user_id, group_id]);
            if ctx.get::<MembershipRecord>(&key)?.is_none() {
                return Err(EngineError::not_found(
                    "membership",
                    format!("{user_id}/{group_id}"),
                ));
            }
            ctx.delete::<MembershipRecord>(&key)
        })
    }

    /// Delete a user together with its memberships and grants.
    pub fn delete_user(&self, session: &Session, user_id: &str) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(Permission::Delete, Resource::User, user_id)])?;
            require_user(ctx, user_id)?;
            for m in ctx.scan_where::<MembershipRecord>(|m| m.user_id == user_id)? {
                ctx.delete::<MembershipRecord>(&m.key())?;
            }
            for a in ctx
                .scan_where::<AuthorizationRecord>(|a| a.user_id.as_deref() == Some(user_id))?
            {
                ctx.delete::<AuthorizationRecord>(&a.id)?;
            }
            ctx.delete::<UserRecord>(user_id)?;
            info!(user_id, "user deleted");
            Ok(())
        })
    }

    /// Delete a group together with its memberships and grants.
    pub fn delete_group(&self, session: &Session, group_id: &str) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            ctx.check_any(&[Required::new(Permission::Delete, Resource::Group, group_id)])?;
            require_group(ctx, group_id)?;
            for m in ctx.scan_where::<MembershipRecord>(|m| m.group_id == group_id)? {
                ctx.delete::<MembershipRecord>(&m.key())?;
            }
            for a in ctx
                .scan_where::<AuthorizationRecord>(|a| a.group_id.as_deref() == Some(group_id))?
            {
                ctx.delete::<AuthorizationRecord>(&a.id)?;
            }
            ctx.delete::<GroupRecord>(group_id)?;
            info!(group_id, "group deleted");
            Ok(())
        })
    }

    pub fn user(&self, user_id: &str) -> Result<Option<User>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            Ok(ctx.get::<UserRecord>(user_id)?.map(User::from))
        })
    }

    pub fn group(&self, group_id: &str) -> Result<Option<Group>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            Ok(ctx.get::<GroupRecord>(group_id)?.map(Group::from))
        })
    }

    pub fn groups_of_user(&self, user_id: &str) -> Result<Vec<Group>, EngineError> {
        self.engine
            .execute(&Session::new(), |ctx| groups_of(ctx, user_id))
    }

    pub fn members_of_group(&self, group_id: &str) -> Result<Vec<User>, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            let mut users = Vec::new();
            for m in ctx.scan_where::<MembershipRecord>(|m| m.group_id == group_id)? {
                if let Some(u) = ctx.get::<UserRecord>(&m.user_id)? {
                    users.push(User::from(u));
                }
            }
            Ok(users)
        })
    }

    /// Build the authentication for an existing user from its memberships.
    pub fn authenticate(&self, user_id: &str) -> Result<Authentication, EngineError> {
        self.engine.execute(&Session::new(), |ctx| {
            require_user(ctx, user_id)?;
            let group_ids = groups_of(ctx, user_id)?.into_iter().map(|g| g.id);
            Ok(Authentication::new(user_id, group_ids))
        })
    }
}

fn groups_of<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    user_id: &str,
) -> Result<Vec<Group>, EngineError> {
    let mut groups = Vec::new();
    for m in ctx.scan_where::<MembershipRecord>(|m| m.user_id == user_id)? {
        if let Some(g) = ctx.get::<GroupRecord>(&m.group_id)? {
            groups.push(Group::from(g));
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> ProcessEngine {
        ProcessEngine::in_memory(EngineConfig::default())
    }

    #[test]
    fn session_authentication_lifecycle() {
        let mut session = Session::new();
        assert!(session.current_authentication().is_none());
        session.set_authentication(Authentication::new("demo", ["accounting"]));
        assert_eq!(
            session.current_authentication().map(|a| a.user_id.as_str()),
            Some("demo")
        );
        session.clear_authentication();
        assert!(session.current_authentication().is_none());
    }

    #[test]
    fn create_user_defaults_display_name() {
        let engine = engine();
        let user = engine
            .identity_service()
            .create_user(&Session::new(), NewUser::new("demo"))
            .unwrap();
        assert_eq!(user.display_name, "demo");
    }

    #[test]
    fn duplicate_user_is_rejected() {
        let engine = engine();
        let ids = engine.identity_service();
        ids.create_user(&Session::new(), NewUser::new("demo"))
            .unwrap();
        let err = ids
            .create_user(&Session::new(), NewUser::new("demo"))
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists { kind: "user", .. }));
    }

    #[test]
    fn empty_and_wildcard_ids_are_rejected() {
        let engine = engine();
        let ids = engine.identity_service();
        assert!(matches!(
            ids.create_user(&Session::new(), NewUser::new("  ")),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            ids.create_group(&Session::new(), NewGroup::new(ANY)),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn membership_requires_existing_user_and_group() {
        let engine = engine();
        let ids = engine.identity_service();
        ids.create_group(&Session::new(), NewGroup::new("accounting"))
            .unwrap();
        let err = ids
            .create_membership(&Session::new(), "ghost", "accounting")
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "user", .. }));
    }

    #[test]
    fn authenticate_resolves_groups() {
        let engine = engine();
        let ids = engine.identity_service();
        let system = Session::new();
        ids.create_user(&system, NewUser::new("demo")).unwrap();
        ids.create_group(&system, NewGroup::new("accounting").name("Accounting"))
            .unwrap();
        ids.create_group(&system, NewGroup::new("sales")).unwrap();
        ids.create_membership(&system, "demo", "accounting").unwrap();
        ids.create_membership(&system, "demo", "sales").unwrap();

        let auth = ids.authenticate("demo").unwrap();
        assert_eq!(auth.group_ids, vec!["accounting", "sales"]);
        assert_eq!(ids.members_of_group("sales").unwrap().len(), 1);

        ids.delete_membership(&system, "demo", "sales").unwrap();
        let groups = ids.groups_of_user("demo").unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Accounting");
    }

    #[test]
    fn delete_user_removes_memberships() {
        let engine = engine();
        let ids = engine.identity_service();
        let system = Session::new();
        ids.create_user(&system, NewUser::new("demo")).unwrap();
        ids.create_group(&system, NewGroup::new("accounting")).unwrap();
        ids.create_membership(&system, "demo", "accounting").unwrap();

        ids.delete_user(&system, "demo").unwrap();
        assert!(ids.user("demo").unwrap().is_none());
        assert!(ids.members_of_group("accounting").unwrap().is_empty());
    }
}
