//! Process instances: start, delete, query, variables, and the entry points
//! for message correlation.

use procflow_model::DefinitionKind;
use procflow_storage::{
    EndReason, EngineStorage, ProcessInstanceRecord, ProcessInstanceState,
};
use tracing::debug;

use crate::authorization::{Permission, Required, Resource, ANY};
use crate::correlation::{CorrelationResult, MessageCorrelationBuilder};
use crate::engine::{CommandContext, ProcessEngine};
use crate::error::EngineError;
use crate::identity::Session;
use crate::lifecycle::{self, Closure, InstanceRef};
use crate::repository::latest_definition;
use crate::Variables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInstance {
    pub id: String,
    pub definition_id: String,
    pub definition_key: String,
    pub state: ProcessInstanceState,
    pub end_reason: Option<EndReason>,
    pub delete_reason: Option<String>,
}

impl ProcessInstance {
    pub fn is_ended(&self) -> bool {
        self.state == ProcessInstanceState::Ended
    }
}

impl From<ProcessInstanceRecord> for ProcessInstance {
    fn from(r: ProcessInstanceRecord) -> Self {
        Self {
            id: r.id,
            definition_id: r.definition_id,
            definition_key: r.definition_key,
            state: r.state,
            end_reason: r.end_reason,
            delete_reason: r.delete_reason,
        }
    }
}

/// Either permission lets a caller see a process instance.
pub(crate) fn read_instance(p: &ProcessInstanceRecord) -> [Required; 2] {
    [
        Required::new(Permission::Read, Resource::ProcessInstance, &p.id),
        Required::new(
            Permission::ReadInstance,
            Resource::ProcessDefinition,
            &p.definition_key,
        ),
    ]
}

/// Either permission lets a caller change a process instance.
pub(crate) fn update_instance(p: &ProcessInstanceRecord) -> [Required; 2] {
    [
        Required::new(Permission::Update, Resource::ProcessInstance, &p.id),
        Required::new(
            Permission::UpdateInstance,
            Resource::ProcessDefinition,
            &p.definition_key,
        ),
    ]
}

/// An active process instance, or `NotFound`.
pub(crate) fn require_active<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    process_instance_id: &str,
) -> Result<ProcessInstanceRecord, EngineError> {
    let process: ProcessInstanceRecord = ctx.require("process instance", process_instance_id)?;
    if process.state != ProcessInstanceState::Active {
        return Err(EngineError::not_found("process instance", process_instance_id));
    }
    Ok(process)
}

/// Filters for [`RuntimeService::process_instance_query`].
pub struct ProcessInstanceQuery<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
    process_instance_id: Option<String>,
    definition_key: Option<String>,
    state: Option<ProcessInstanceState>,
}

impl<'e, S: EngineStorage> ProcessInstanceQuery<'e, S> {
    pub fn process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.definition_key = Some(key.into());
        self
    }

    pub fn state(mut self, state: ProcessInstanceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn active(self) -> Self {
        self.state(ProcessInstanceState::Active)
    }

    pub fn ended(self) -> Self {
        self.state(ProcessInstanceState::Ended)
    }

    fn matches(&self, p: &ProcessInstanceRecord) -> bool {
        self.process_instance_id.as_ref().map_or(true, |id| &p.id == id)
            && self
                .definition_key
                .as_ref()
                .map_or(true, |k| &p.definition_key == k)
            && self.state.map_or(true, |s| p.state == s)
    }

    /// Matching instances visible to the session, in id order.
    pub fn list(&self, session: &Session) -> Result<Vec<ProcessInstance>, EngineError> {
        self.engine.execute(session, |ctx| {
            let mut visible = Vec::new();
            for p in ctx.scan_where::<ProcessInstanceRecord>(|p| self.matches(p))? {
                if ctx.is_visible(&read_instance(&p))? {
                    visible.push(p);
                }
            }
            visible.sort_by_key(|p| p.id.parse::<u64>().unwrap_or(u64::MAX));
            Ok(visible.into_iter().map(ProcessInstance::from).collect())
        })
    }

    pub fn count(&self, session: &Session) -> Result<usize, EngineError> {
        Ok(self.list(session)?.len())
    }

    /// The one matching instance, if any. More than one match is an error.
    pub fn single_result(&self, session: &Session) -> Result<Option<ProcessInstance>, EngineError> {
        let mut found = self.list(session)?;
        if found.len() > 1 {
            return Err(EngineError::invalid(format!(
                "query returned {} process instances, expected at most one",
                found.len()
            )));
        }
        Ok(found.pop())
    }
}

/// Process instances and message correlation.
pub struct RuntimeService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> RuntimeService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    /// Start the latest version of the process definition `key`.
    ///
    /// Requires CREATE on every process instance and CREATE_INSTANCE on the
    /// process definition.
    pub fn start_process_instance_by_key(
        &self,
        session: &Session,
        key: &str,
        variables: Variables,
    ) -> Result<ProcessInstance, EngineError> {
        self.engine.execute(session, |ctx| {
            let definition = latest_definition(ctx, key, DefinitionKind::Process)?;
            ctx.check_all(&[
                Required::new(Permission::Create, Resource::ProcessInstance, ANY),
                Required::new(Permission::CreateInstance, Resource::ProcessDefinition, key),
            ])?;
            let model = definition
                .model
                .as_process()
                .cloned()
                .ok_or_else(|| EngineError::not_found("process definition", key))?;
            let record = lifecycle::open_process(ctx, &definition, &model, &variables)?;
            Ok(record.into())
        })
    }

    /// Delete an active process instance; its case is terminated with it.
    pub fn delete_process_instance(
        &self,
        session: &Session,
        process_instance_id: &str,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            let process = require_active(ctx, process_instance_id)?;
            ctx.check_any(&[
                Required::new(Permission::Delete, Resource::ProcessInstance, &process.id),
                Required::new(
                    Permission::DeleteInstance,
                    Resource::ProcessDefinition,
                    &process.definition_key,
                ),
            ])?;
            lifecycle::close(
                ctx,
                InstanceRef::Process(process_instance_id),
                Closure::Delete {
                    reason: reason.map(str::to_string),
                },
            )
        })
    }

    pub fn process_instance_query(&self) -> ProcessInstanceQuery<'e, S> {
        ProcessInstanceQuery {
            engine: self.engine,
            process_instance_id: None,
            definition_key: None,
            state: None,
        }
    }

    pub fn process_instance(
        &self,
        session: &Session,
        process_instance_id: &str,
    ) -> Result<Option<ProcessInstance>, EngineError> {
        self.process_instance_query()
            .process_instance_id(process_instance_id)
            .single_result(session)
    }

    /// Process-scope variables of an active instance.
    pub fn variables(
        &self,
        session: &Session,
        process_instance_id: &str,
    ) -> Result<Variables, EngineError> {
        self.engine.execute(session, |ctx| {
            let process = require_active(ctx, process_instance_id)?;
            ctx.check_any(&read_instance(&process))?;
            lifecycle::read_variables(ctx, &process.id)
        })
    }

    /// Set process-scope variables on an active instance.
    pub fn set_variables(
        &self,
        session: &Session,
        process_instance_id: &str,
        variables: Variables,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            let process = require_active(ctx, process_instance_id)?;
            ctx.check_any(&update_instance(&process))?;
            lifecycle::write_variables(ctx, &process.id, &variables)?;
            debug!(process_instance_id, count = variables.len(), "process variables set");
            Ok(())
        })
    }

    pub fn create_message_correlation(
        &self,
        message_name: impl Into<String>,
    ) -> MessageCorrelationBuilder<'e, S> {
        MessageCorrelationBuilder::new(self.engine, message_name.into())
    }

    /// Correlate `message_name` to its single waiting instance.
    pub fn correlate_message(
        &self,
        session: &Session,
        message_name: &str,
    ) -> Result<CorrelationResult, EngineError> {
        self.create_message_correlation(message_name)
            .correlate(session)
    }
}
