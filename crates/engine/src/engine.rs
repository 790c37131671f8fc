//! The process engine and its command execution.
//!
//! Every public operation of every service runs through
//! [`ProcessEngine::execute`]: the command lock is taken, a storage
//! snapshot is opened, the command runs against a [`CommandContext`], and
//! the snapshot is committed on success or aborted on any error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use procflow_storage::{
    AttachmentRecord, AuthorizationRecord, CaseInstanceRecord, DeploymentRecord, EngineStorage,
    EventSubscriptionRecord, InMemoryStorage, ProcessInstanceRecord, Record, TaskRecord,
};
use tracing::warn;

use crate::authorization::{AuthorizationGate, AuthorizationService, Required};
use crate::case::CaseService;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::{Authentication, IdentityService, Session};
use crate::repository::RepositoryService;
use crate::runtime::RuntimeService;
use crate::task::TaskService;

/// An in-process workflow engine over a storage backend.
///
/// The engine is `Send + Sync`; share it behind an `Arc` to use it from
/// several threads. Commands are serialized by an internal lock.
pub struct ProcessEngine<S: EngineStorage = InMemoryStorage> {
    storage: S,
    config: EngineConfig,
    authorization_enabled: AtomicBool,
    next_id: AtomicU64,
    ids_seeded: AtomicBool,
    command_lock: Mutex<()>,
}

impl ProcessEngine<InMemoryStorage> {
    /// An engine over fresh in-memory storage.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(InMemoryStorage::new(), config)
    }
}

impl<S: EngineStorage> ProcessEngine<S> {
    /// The storage may already hold data; generated ids continue after the
    /// largest numeric id found there on the first command.
    pub fn new(storage: S, config: EngineConfig) -> Self {
        Self {
            storage,
            authorization_enabled: AtomicBool::new(config.authorization_enabled),
            config,
            next_id: AtomicU64::new(1),
            ids_seeded: AtomicBool::new(false),
            command_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Turn authorization checks on or off for every subsequent command.
    pub fn set_authorization_enabled(&self, enabled: bool) {
        self.authorization_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_authorization_enabled(&self) -> bool {
        self.authorization_enabled.load(Ordering::SeqCst)
    }

    pub fn identity_service(&self) -> IdentityService<'_, S> {
        IdentityService::new(self)
    }

    pub fn authorization_service(&self) -> AuthorizationService<'_, S> {
        AuthorizationService::new(self)
    }

    pub fn repository_service(&self) -> RepositoryService<'_, S> {
        RepositoryService::new(self)
    }

    pub fn runtime_service(&self) -> RuntimeService<'_, S> {
        RuntimeService::new(self)
    }

    pub fn task_service(&self) -> TaskService<'_, S> {
        TaskService::new(self)
    }

    pub fn case_service(&self) -> CaseService<'_, S> {
        CaseService::new(self)
    }

    pub(crate) fn gate(&self) -> AuthorizationGate<'_> {
        AuthorizationGate::new(self.is_authorization_enabled(), &self.config)
    }

    /// Run `command` as one atomic unit of work on behalf of `session`.
    pub(crate) fn execute<T, F>(&self, session: &Session, command: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut CommandContext<'_, S>) -> Result<T, EngineError>,
    {
        let _guard = self
            .command_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.storage.begin_snapshot()?;
        let mut ctx = CommandContext {
            engine: self,
            session,
            snapshot,
        };
        match self.seed_ids(&ctx).and_then(|()| command(&mut ctx)) {
            Ok(value) => {
                self.storage.commit_snapshot(ctx.snapshot)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = self.storage.abort_snapshot(ctx.snapshot) {
                    warn!(error = %abort_err, "failed to abort command snapshot");
                }
                Err(err)
            }
        }
    }

    fn next_number(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Move the id counter past every engine-generated id already stored.
    /// Runs once, under the command lock.
    fn seed_ids(&self, ctx: &CommandContext<'_, S>) -> Result<(), EngineError> {
        if self.ids_seeded.load(Ordering::SeqCst) {
            return Ok(());
        }
        let highest = [
            highest_id::<S, AuthorizationRecord>(ctx)?,
            highest_id::<S, DeploymentRecord>(ctx)?,
            highest_id::<S, ProcessInstanceRecord>(ctx)?,
            highest_id::<S, CaseInstanceRecord>(ctx)?,
            highest_id::<S, TaskRecord>(ctx)?,
            highest_id::<S, AttachmentRecord>(ctx)?,
            highest_id::<S, EventSubscriptionRecord>(ctx)?,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        self.next_id.fetch_max(highest + 1, Ordering::SeqCst);
        self.ids_seeded.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn highest_id<S: EngineStorage, R: Record>(ctx: &CommandContext<'_, S>) -> Result<u64, EngineError> {
    Ok(ctx
        .scan::<R>()?
        .iter()
        .filter_map(|r| r.key().parse::<u64>().ok())
        .max()
        .unwrap_or(0))
}

/// The view of the engine a single command works through.
pub(crate) struct CommandContext<'a, S: EngineStorage> {
    engine: &'a ProcessEngine<S>,
    session: &'a Session,
    snapshot: S::Snapshot,
}

impl<'a, S: EngineStorage> CommandContext<'a, S> {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    pub(crate) fn authentication(&self) -> Option<&Authentication> {
        self.session.current_authentication()
    }

    /// A fresh numeric id, unique for the lifetime of the engine.
    pub(crate) fn next_number(&self) -> u64 {
        self.engine.next_number()
    }

    pub(crate) fn next_id(&self) -> String {
        self.next_number().to_string()
    }

    // ── Storage access ──────────────────────────────────────────────────

    pub(crate) fn get<R: Record>(&self, key: &str) -> Result<Option<R>, EngineError> {
        Ok(self.engine.storage.get(&self.snapshot, key)?)
    }

    /// Like [`get`](Self::get), but a missing record is `NotFound` for `kind`.
    pub(crate) fn require<R: Record>(&self, kind: &'static str, key: &str) -> Result<R, EngineError> {
        self.get(key)?
            .ok_or_else(|| EngineError::not_found(kind, key))
    }

    pub(crate) fn scan<R: Record>(&self) -> Result<Vec<R>, EngineError> {
        Ok(self.engine.storage.scan(&self.snapshot)?)
    }

    /// Every record of a table that satisfies `keep`.
    pub(crate) fn scan_where<R: Record>(
        &self,
        keep: impl Fn(&R) -> bool,
    ) -> Result<Vec<R>, EngineError> {
        Ok(self.scan::<R>()?.into_iter().filter(|r| keep(r)).collect())
    }

    pub(crate) fn insert<R: Record>(&mut self, record: &R) -> Result<(), EngineError> {
        Ok(self.engine.storage.insert(&mut self.snapshot, record)?)
    }

    pub(crate) fn update<R: Record>(&mut self, record: &R) -> Result<(), EngineError> {
        Ok(self.engine.storage.update(&mut self.snapshot, record)?)
    }

    pub(crate) fn delete<R: Record>(&mut self, key: &str) -> Result<(), EngineError> {
        Ok(self.engine.storage.delete::<R>(&mut self.snapshot, key)?)
    }

    // ── Authorization ───────────────────────────────────────────────────

    /// Fail unless the session holds at least one of `required`.
    pub(crate) fn check_any(&self, required: &[Required]) -> Result<(), EngineError> {
        let gate = self.engine.gate();
        let auth = self.authentication();
        if gate.bypasses(auth) {
            return Ok(());
        }
        let grants = self.scan::<AuthorizationRecord>()?;
        gate.check_any(auth, &grants, required).map_err(|err| {
            warn!(%err, "authorization denied");
            err
        })
    }

    /// Fail unless the session holds every one of `required`.
    pub(crate) fn check_all(&self, required: &[Required]) -> Result<(), EngineError> {
        for r in required {
            self.check_any(std::slice::from_ref(r))?;
        }
        Ok(())
    }

    /// Whether a query result guarded by `required` is visible to the session.
    pub(crate) fn is_visible(&self, required: &[Required]) -> Result<bool, EngineError> {
        let gate = self.engine.gate();
        let auth = self.authentication();
        if gate.bypasses(auth) {
            return Ok(true);
        }
        let grants = self.scan::<AuthorizationRecord>()?;
        Ok(required
            .iter()
            .any(|r| gate.check(auth, &grants, r.resource, &r.resource_id, r.permission)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_storage::UserRecord;

    fn user(id: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            display_name: id.to_string(),
            email: None,
        }
    }

    #[test]
    fn successful_command_commits() {
        let engine = ProcessEngine::in_memory(EngineConfig::default());
        engine
            .execute(&Session::new(), |ctx| ctx.insert(&user("alice")))
            .unwrap();
        let stored: Option<UserRecord> = engine.storage().fetch("alice").unwrap();
        assert!(stored.is_some());
    }

    #[test]
    fn failed_command_leaves_no_trace() {
        let engine = ProcessEngine::in_memory(EngineConfig::default());
        let err = engine
            .execute(&Session::new(), |ctx| -> Result<(), EngineError> {
                ctx.insert(&user("alice"))?;
                Err(EngineError::invalid("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        let stored: Option<UserRecord> = engine.storage().fetch("alice").unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let engine = ProcessEngine::in_memory(EngineConfig::default());
        let ids = engine
            .execute(&Session::new(), |ctx| Ok((ctx.next_number(), ctx.next_number())))
            .unwrap();
        assert!(ids.0 < ids.1);
    }

    #[test]
    fn ids_continue_after_stored_data() {
        let storage = InMemoryStorage::new();
        let mut snapshot = storage.begin_snapshot().unwrap();
        storage
            .insert(
                &mut snapshot,
                &CaseInstanceRecord {
                    id: "41".to_string(),
                    definition_id: "testCase:1:1".to_string(),
                    definition_key: "testCase".to_string(),
                    process_instance_id: None,
                    state: procflow_storage::CaseInstanceState::Active,
                },
            )
            .unwrap();
        storage.commit_snapshot(snapshot).unwrap();

        let engine = ProcessEngine::new(storage, EngineConfig::default());
        let id = engine
            .execute(&Session::new(), |ctx| Ok(ctx.next_number()))
            .unwrap();
        assert_eq!(id, 42);
    }

    #[test]
    fn authorization_toggle_starts_from_config() {
        let engine = ProcessEngine::in_memory(EngineConfig {
            authorization_enabled: true,
            ..EngineConfig::default()
        });
        assert!(engine.is_authorization_enabled());
        engine.set_authorization_enabled(false);
        assert!(!engine.is_authorization_enabled());
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProcessEngine>();
    }
}
