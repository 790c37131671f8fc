//! Case instances and their ACTIVE → COMPLETED | TERMINATED state machine.

use procflow_model::DefinitionKind;
use procflow_storage::{CaseInstanceRecord, CaseInstanceState, EngineStorage};

use crate::authorization::{Permission, Required, Resource, ANY};
use crate::engine::ProcessEngine;
use crate::error::EngineError;
use crate::identity::Session;
use crate::lifecycle::{self, Closure, InstanceRef};
use crate::repository::latest_definition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseInstance {
    pub id: String,
    pub definition_id: String,
    pub definition_key: String,
    pub process_instance_id: Option<String>,
    pub state: CaseInstanceState,
}

impl CaseInstance {
    pub fn is_active(&self) -> bool {
        self.state == CaseInstanceState::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state == CaseInstanceState::Completed
    }

    pub fn is_terminated(&self) -> bool {
        self.state == CaseInstanceState::Terminated
    }
}

impl From<CaseInstanceRecord> for CaseInstance {
    fn from(r: CaseInstanceRecord) -> Self {
        Self {
            id: r.id,
            definition_id: r.definition_id,
            definition_key: r.definition_key,
            process_instance_id: r.process_instance_id,
            state: r.state,
        }
    }
}

pub(crate) fn read_case(c: &CaseInstanceRecord) -> [Required; 1] {
    [Required::new(Permission::Read, Resource::CaseInstance, &c.id)]
}

pub(crate) fn update_case(c: &CaseInstanceRecord) -> [Required; 1] {
    [Required::new(Permission::Update, Resource::CaseInstance, &c.id)]
}

/// Filters for [`CaseService::case_instance_query`].
pub struct CaseInstanceQuery<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
    case_instance_id: Option<String>,
    process_instance_id: Option<String>,
    definition_key: Option<String>,
    state: Option<CaseInstanceState>,
}

impl<'e, S: EngineStorage> CaseInstanceQuery<'e, S> {
    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.case_instance_id = Some(id.into());
        self
    }

    pub fn process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn case_definition_key(mut self, key: impl Into<String>) -> Self {
        self.definition_key = Some(key.into());
        self
    }

    pub fn state(mut self, state: CaseInstanceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn active(self) -> Self {
        self.state(CaseInstanceState::Active)
    }

    fn matches(&self, c: &CaseInstanceRecord) -> bool {
        self.case_instance_id.as_ref().map_or(true, |id| &c.id == id)
            && self
                .process_instance_id
                .as_ref()
                .map_or(true, |pid| c.process_instance_id.as_ref() == Some(pid))
            && self
                .definition_key
                .as_ref()
                .map_or(true, |k| &c.definition_key == k)
            && self.state.map_or(true, |s| c.state == s)
    }

    pub fn list(&self, session: &Session) -> Result<Vec<CaseInstance>, EngineError> {
        self.engine.execute(session, |ctx| {
            let mut visible = Vec::new();
            for c in ctx.scan_where::<CaseInstanceRecord>(|c| self.matches(c))? {
                if ctx.is_visible(&read_case(&c))? {
                    visible.push(c);
                }
            }
            visible.sort_by_key(|c| c.id.parse::<u64>().unwrap_or(u64::MAX));
            Ok(visible.into_iter().map(CaseInstance::from).collect())
        })
    }

    pub fn count(&self, session: &Session) -> Result<usize, EngineError> {
        Ok(self.list(session)?.len())
    }

    pub fn single_result(&self, session: &Session) -> Result<Option<CaseInstance>, EngineError> {
        let mut found = self.list(session)?;
        if found.len() > 1 {
            return Err(EngineError::invalid(format!(
                "query returned {} case instances, expected at most one",
                found.len()
            )));
        }
        Ok(found.pop())
    }
}

/// Case instances.
pub struct CaseService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> CaseService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    pub fn case_instance_query(&self) -> CaseInstanceQuery<'e, S> {
        CaseInstanceQuery {
            engine: self.engine,
            case_instance_id: None,
            process_instance_id: None,
            definition_key: None,
            state: None,
        }
    }

    /// Start a standalone case instance, not owned by any process.
    pub fn create_case_instance_by_key(
        &self,
        session: &Session,
        key: &str,
    ) -> Result<CaseInstance, EngineError> {
        self.engine.execute(session, |ctx| {
            let definition = latest_definition(ctx, key, DefinitionKind::Case)?;
            ctx.check_any(&[Required::new(Permission::Create, Resource::CaseInstance, ANY)])?;
            let model = definition
                .model
                .as_case()
                .cloned()
                .ok_or_else(|| EngineError::not_found("case definition", key))?;
            Ok(lifecycle::open_case(ctx, &definition, &model, None)?.into())
        })
    }

    /// Complete an active case; its process completes with it.
    ///
    /// A case that is already completed or terminated cannot be completed.
    pub fn complete_case_instance(
        &self,
        session: &Session,
        case_instance_id: &str,
    ) -> Result<CaseInstance, EngineError> {
        self.transition(session, case_instance_id, Closure::Complete)
    }

    /// Terminate an active case; its process is terminated with it.
    ///
    /// Terminating a case that is already closed changes nothing and
    /// returns it as it is.
    pub fn terminate_case_instance(
        &self,
        session: &Session,
        case_instance_id: &str,
    ) -> Result<CaseInstance, EngineError> {
        self.transition(session, case_instance_id, Closure::Terminate)
    }

    fn transition(
        &self,
        session: &Session,
        case_instance_id: &str,
        closure: Closure,
    ) -> Result<CaseInstance, EngineError> {
        self.engine.execute(session, |ctx| {
            let case: CaseInstanceRecord = ctx.require("case instance", case_instance_id)?;
            ctx.check_any(&update_case(&case))?;
            if case.state.is_terminal() {
                if closure == Closure::Complete {
                    return Err(EngineError::IllegalTransition {
                        case_instance_id: case.id,
                        from: case.state,
                        to: CaseInstanceState::Completed,
                    });
                }
                return Ok(case.into());
            }
            lifecycle::close(ctx, InstanceRef::Case(case_instance_id), closure)?;
            let closed: CaseInstanceRecord = ctx.require("case instance", case_instance_id)?;
            Ok(closed.into())
        })
    }
}
