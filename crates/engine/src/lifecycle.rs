//! Opening and closing instances.
//!
//! [`close`] is the only place instance state changes after creation. It
//! resolves the process/case pair through the link table and moves every
//! still-active side to its terminal state, deleting the runtime data
//! (tasks, variables, attachments, subscriptions) that belonged to it.

use procflow_model::{CaseModel, DefinitionKind, MessageAction, MessageEvent, ProcessModel};
use procflow_storage::{
    AttachmentRecord, CaseInstanceRecord, CaseInstanceState, EndReason, EngineStorage,
    EventSubscriptionRecord, InstanceKind, InstanceLinkRecord, ProcessInstanceRecord,
    ProcessInstanceState, Record, SubscriptionAction, TaskRecord, VariableRecord,
};
use tracing::{debug, info};

use crate::engine::CommandContext;
use crate::error::EngineError;
use crate::repository::{latest_definition, DeployedDefinition};
use crate::Variables;

/// The instance a transition starts from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum InstanceRef<'a> {
    Process(&'a str),
    Case(&'a str),
}

/// How an instance is being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Closure {
    /// Normal completion; process and case both complete.
    Complete,
    /// Forced closure; the process is terminated and the case terminated.
    Terminate,
    /// Explicit deletion of the process; the case is terminated.
    Delete { reason: Option<String> },
}

impl Closure {
    fn end_reason(&self) -> EndReason {
        match self {
            Closure::Complete => EndReason::Completed,
            Closure::Terminate => EndReason::Terminated,
            Closure::Delete { .. } => EndReason::Deleted,
        }
    }

    fn case_state(&self) -> CaseInstanceState {
        match self {
            Closure::Complete => CaseInstanceState::Completed,
            Closure::Terminate | Closure::Delete { .. } => CaseInstanceState::Terminated,
        }
    }
}

impl From<SubscriptionAction> for Closure {
    fn from(action: SubscriptionAction) -> Self {
        match action {
            SubscriptionAction::Terminate => Closure::Terminate,
            SubscriptionAction::Complete => Closure::Complete,
        }
    }
}

fn subscription_action(action: MessageAction) -> SubscriptionAction {
    match action {
        MessageAction::Terminate => SubscriptionAction::Terminate,
        MessageAction::Complete => SubscriptionAction::Complete,
    }
}

fn subscribe<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    target_kind: InstanceKind,
    target_id: &str,
    messages: &[MessageEvent],
) -> Result<(), EngineError> {
    for message in messages {
        let record = EventSubscriptionRecord {
            id: ctx.next_id(),
            message_name: message.name.clone(),
            target_kind,
            target_id: target_id.to_string(),
            action: subscription_action(message.action),
        };
        ctx.insert(&record)?;
    }
    Ok(())
}

fn unsubscribe<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    target_kind: InstanceKind,
    target_id: &str,
) -> Result<(), EngineError> {
    let subscriptions = ctx.scan_where::<EventSubscriptionRecord>(|s| {
        s.target_kind == target_kind && s.target_id == target_id
    })?;
    for s in subscriptions {
        ctx.delete::<EventSubscriptionRecord>(&s.id)?;
    }
    Ok(())
}

fn delete_variables<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    scope_id: &str,
) -> Result<(), EngineError> {
    for v in ctx.scan_where::<VariableRecord>(|v| v.scope_id == scope_id)? {
        ctx.delete::<VariableRecord>(&v.key())?;
    }
    Ok(())
}

pub(crate) fn write_variables<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    scope_id: &str,
    variables: &Variables,
) -> Result<(), EngineError> {
    for (name, value) in variables {
        let record = VariableRecord {
            scope_id: scope_id.to_string(),
            name: name.clone(),
            value: value.clone(),
        };
        if ctx.get::<VariableRecord>(&record.key())?.is_some() {
            ctx.update(&record)?;
        } else {
            ctx.insert(&record)?;
        }
    }
    Ok(())
}

pub(crate) fn read_variables<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    scope_id: &str,
) -> Result<Variables, EngineError> {
    Ok(ctx
        .scan_where::<VariableRecord>(|v| v.scope_id == scope_id)?
        .into_iter()
        .map(|v| (v.name, v.value))
        .collect())
}

/// Delete a task along with its local variables and attachments.
pub(crate) fn remove_task<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    task_id: &str,
) -> Result<(), EngineError> {
    delete_variables(ctx, task_id)?;
    for a in ctx.scan_where::<AttachmentRecord>(|a| a.task_id.as_deref() == Some(task_id))? {
        ctx.delete::<AttachmentRecord>(&a.id)?;
    }
    ctx.delete::<TaskRecord>(task_id)
}

/// Create a case instance of `definition`, optionally owned by a process.
pub(crate) fn open_case<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    definition: &DeployedDefinition,
    model: &CaseModel,
    process_instance_id: Option<&str>,
) -> Result<CaseInstanceRecord, EngineError> {
    let record = CaseInstanceRecord {
        id: ctx.next_id(),
        definition_id: definition.id.clone(),
        definition_key: model.key.clone(),
        process_instance_id: process_instance_id.map(str::to_string),
        state: CaseInstanceState::Active,
    };
    ctx.insert(&record)?;
    subscribe(ctx, InstanceKind::Case, &record.id, &model.messages)?;
    debug!(case_instance_id = %record.id, definition_id = %record.definition_id, "case instance created");
    Ok(record)
}

/// Start a process instance: the instance, its variables, its tasks, its
/// subscriptions and, when declared, its companion case and link.
pub(crate) fn open_process<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    definition: &DeployedDefinition,
    model: &ProcessModel,
    variables: &Variables,
) -> Result<ProcessInstanceRecord, EngineError> {
    let record = ProcessInstanceRecord {
        id: ctx.next_id(),
        definition_id: definition.id.clone(),
        definition_key: model.key.clone(),
        state: ProcessInstanceState::Active,
        end_reason: None,
        delete_reason: None,
    };
    ctx.insert(&record)?;
    write_variables(ctx, &record.id, variables)?;

    for task in &model.tasks {
        let sequence = ctx.next_number();
        ctx.insert(&TaskRecord {
            id: sequence.to_string(),
            name: task.name.clone(),
            task_definition_key: task.key.clone(),
            execution_id: record.id.clone(),
            process_instance_id: record.id.clone(),
            process_definition_key: model.key.clone(),
            sequence,
        })?;
    }
    subscribe(ctx, InstanceKind::Process, &record.id, &model.messages)?;

    if let Some(case_key) = model.companion_case.as_deref().filter(|k| !k.is_empty()) {
        let case_definition = latest_definition(ctx, case_key, DefinitionKind::Case)?;
        let case_model = case_definition
            .model
            .as_case()
            .cloned()
            .ok_or_else(|| EngineError::not_found("case definition", case_key))?;
        let case = open_case(ctx, &case_definition, &case_model, Some(&record.id))?;
        ctx.insert(&InstanceLinkRecord {
            process_instance_id: record.id.clone(),
            case_instance_id: case.id,
        })?;
    }

    info!(
        process_instance_id = %record.id,
        definition_id = %record.definition_id,
        tasks = model.tasks.len(),
        "process instance started"
    );
    Ok(record)
}

/// The process/case pair `target` belongs to. Either side may be absent.
pub(crate) fn family<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    target: InstanceRef<'_>,
) -> Result<(Option<ProcessInstanceRecord>, Option<CaseInstanceRecord>), EngineError> {
    match target {
        InstanceRef::Process(id) => {
            let process: ProcessInstanceRecord = ctx.require("process instance", id)?;
            let case = match ctx.get::<InstanceLinkRecord>(id)? {
                Some(link) => ctx.get::<CaseInstanceRecord>(&link.case_instance_id)?,
                None => None,
            };
            Ok((Some(process), case))
        }
        InstanceRef::Case(id) => {
            let case: CaseInstanceRecord = ctx.require("case instance", id)?;
            let process = match case.process_instance_id.as_deref() {
                Some(pid) => ctx.get::<ProcessInstanceRecord>(pid)?,
                None => None,
            };
            Ok((process, Some(case)))
        }
    }
}

/// Close `target` and its linked counterpart in the current snapshot.
///
/// Sides that are already closed are left as they are.
pub(crate) fn close<S: EngineStorage>(
    ctx: &mut CommandContext<'_, S>,
    target: InstanceRef<'_>,
    closure: Closure,
) -> Result<(), EngineError> {
    let (process, case) = family(ctx, target)?;

    if let Some(mut process) = process.filter(|p| p.state == ProcessInstanceState::Active) {
        for task in ctx.scan_where::<TaskRecord>(|t| t.process_instance_id == process.id)? {
            remove_task(ctx, &task.id)?;
        }
        let pid = process.id.clone();
        for a in ctx
            .scan_where::<AttachmentRecord>(|a| a.process_instance_id.as_deref() == Some(pid.as_str()))?
        {
            ctx.delete::<AttachmentRecord>(&a.id)?;
        }
        delete_variables(ctx, &process.id)?;
        unsubscribe(ctx, InstanceKind::Process, &process.id)?;

        process.state = ProcessInstanceState::Ended;
        process.end_reason = Some(closure.end_reason());
        if let Closure::Delete { reason } = &closure {
            process.delete_reason = reason.clone();
        }
        ctx.update(&process)?;
        info!(
            process_instance_id = %process.id,
            end_reason = ?closure.end_reason(),
            "process instance ended"
        );
    }

    if let Some(mut case) = case.filter(|c| !c.state.is_terminal()) {
        unsubscribe(ctx, InstanceKind::Case, &case.id)?;
        case.state = closure.case_state();
        ctx.update(&case)?;
        info!(case_instance_id = %case.id, state = ?case.state, "case instance closed");
    }

    Ok(())
}
