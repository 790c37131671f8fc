//! User tasks: queries, variables, attachments and completion.

use procflow_storage::{AttachmentRecord, EngineStorage, TaskRecord};
use tracing::{debug, info};

use crate::authorization::{Permission, Required, Resource};
use crate::engine::{CommandContext, ProcessEngine};
use crate::error::EngineError;
use crate::identity::Session;
use crate::lifecycle::{self, Closure, InstanceRef};
use crate::runtime::{require_active, update_instance};
use crate::Variables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: Option<String>,
    pub task_definition_key: String,
    pub execution_id: String,
    pub process_instance_id: String,
    pub process_definition_key: String,
}

impl From<TaskRecord> for Task {
    fn from(r: TaskRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            task_definition_key: r.task_definition_key,
            execution_id: r.execution_id,
            process_instance_id: r.process_instance_id,
            process_definition_key: r.process_definition_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub attachment_type: String,
    pub task_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl From<AttachmentRecord> for Attachment {
    fn from(r: AttachmentRecord) -> Self {
        Self {
            id: r.id,
            attachment_type: r.attachment_type,
            task_id: r.task_id,
            process_instance_id: r.process_instance_id,
            name: r.name,
            description: r.description,
            url: r.url,
        }
    }
}

/// An attachment to be created on a task, a process instance, or both.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    attachment_type: String,
    name: String,
    task_id: Option<String>,
    process_instance_id: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

impl NewAttachment {
    pub fn new(attachment_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            attachment_type: attachment_type.into(),
            name: name.into(),
            task_id: None,
            process_instance_id: None,
            description: None,
            url: None,
        }
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn process_instance(mut self, process_instance_id: impl Into<String>) -> Self {
        self.process_instance_id = Some(process_instance_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

fn read_task(t: &TaskRecord) -> [Required; 2] {
    [
        Required::new(Permission::Read, Resource::Task, &t.id),
        Required::new(
            Permission::ReadTask,
            Resource::ProcessDefinition,
            &t.process_definition_key,
        ),
    ]
}

fn update_task(t: &TaskRecord) -> [Required; 3] {
    [
        Required::new(Permission::Update, Resource::Task, &t.id),
        Required::new(Permission::TaskWork, Resource::Task, &t.id),
        Required::new(
            Permission::UpdateTask,
            Resource::ProcessDefinition,
            &t.process_definition_key,
        ),
    ]
}

fn require_task<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    task_id: &str,
) -> Result<TaskRecord, EngineError> {
    ctx.require("task", task_id)
}

/// Filters for [`TaskService::task_query`].
pub struct TaskQuery<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
    task_id: Option<String>,
    execution_id: Option<String>,
    process_instance_id: Option<String>,
    task_definition_key: Option<String>,
    process_definition_key: Option<String>,
}

impl<'e, S: EngineStorage> TaskQuery<'e, S> {
    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    pub fn task_definition_key(mut self, key: impl Into<String>) -> Self {
        self.task_definition_key = Some(key.into());
        self
    }

    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.process_definition_key = Some(key.into());
        self
    }

    fn matches(&self, t: &TaskRecord) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }
        eq(&self.task_id, &t.id)
            && eq(&self.execution_id, &t.execution_id)
            && eq(&self.process_instance_id, &t.process_instance_id)
            && eq(&self.task_definition_key, &t.task_definition_key)
            && eq(&self.process_definition_key, &t.process_definition_key)
    }

    /// Matching tasks visible to the session, in creation order.
    pub fn list(&self, session: &Session) -> Result<Vec<Task>, EngineError> {
        self.engine.execute(session, |ctx| {
            let mut visible = Vec::new();
            for t in ctx.scan_where::<TaskRecord>(|t| self.matches(t))? {
                if ctx.is_visible(&read_task(&t))? {
                    visible.push(t);
                }
            }
            visible.sort_by_key(|t| t.sequence);
            Ok(visible.into_iter().map(Task::from).collect())
        })
    }

    pub fn count(&self, session: &Session) -> Result<usize, EngineError> {
        Ok(self.list(session)?.len())
    }

    pub fn single_result(&self, session: &Session) -> Result<Option<Task>, EngineError> {
        let mut found = self.list(session)?;
        if found.len() > 1 {
            return Err(EngineError::invalid(format!(
                "query returned {} tasks, expected at most one",
                found.len()
            )));
        }
        Ok(found.pop())
    }
}

/// User tasks.
pub struct TaskService<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
}

impl<'e, S: EngineStorage> TaskService<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>) -> Self {
        Self { engine }
    }

    pub fn task_query(&self) -> TaskQuery<'e, S> {
        TaskQuery {
            engine: self.engine,
            task_id: None,
            execution_id: None,
            process_instance_id: None,
            task_definition_key: None,
            process_definition_key: None,
        }
    }

    /// Set a variable through the task, on its process instance.
    pub fn set_variable(
        &self,
        session: &Session,
        task_id: &str,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&update_task(&task))?;
            let vars = Variables::from([(name.to_string(), value)]);
            lifecycle::write_variables(ctx, &task.process_instance_id, &vars)?;
            debug!(task_id, name, "task variable set");
            Ok(())
        })
    }

    /// Set a variable on the task itself.
    pub fn set_variable_local(
        &self,
        session: &Session,
        task_id: &str,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&update_task(&task))?;
            let vars = Variables::from([(name.to_string(), value)]);
            lifecycle::write_variables(ctx, &task.id, &vars)?;
            debug!(task_id, name, "task-local variable set");
            Ok(())
        })
    }

    /// Variables visible from the task: its process's, overridden by its own.
    pub fn variables(&self, session: &Session, task_id: &str) -> Result<Variables, EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&read_task(&task))?;
            let mut vars = lifecycle::read_variables(ctx, &task.process_instance_id)?;
            vars.extend(lifecycle::read_variables(ctx, &task.id)?);
            Ok(vars)
        })
    }

    pub fn variables_local(
        &self,
        session: &Session,
        task_id: &str,
    ) -> Result<Variables, EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&read_task(&task))?;
            lifecycle::read_variables(ctx, &task.id)
        })
    }

    /// Create an attachment on a task, a process instance, or both.
    ///
    /// A task owner requires the task update permissions; a process owner
    /// requires the process instance update permissions.
    pub fn create_attachment(
        &self,
        session: &Session,
        new: NewAttachment,
    ) -> Result<Attachment, EngineError> {
        if new.task_id.is_none() && new.process_instance_id.is_none() {
            return Err(EngineError::invalid(
                "an attachment needs a task id or a process instance id",
            ));
        }
        if new.name.trim().is_empty() {
            return Err(EngineError::invalid("attachment name must not be empty"));
        }
        self.engine.execute(session, |ctx| {
            if let Some(task_id) = new.task_id.as_deref() {
                let task = require_task(ctx, task_id)?;
                ctx.check_any(&update_task(&task))?;
            }
            if let Some(pid) = new.process_instance_id.as_deref() {
                let process = require_active(ctx, pid)?;
                ctx.check_any(&update_instance(&process))?;
            }
            let record = AttachmentRecord {
                id: ctx.next_id(),
                attachment_type: new.attachment_type.clone(),
                task_id: new.task_id.clone(),
                process_instance_id: new.process_instance_id.clone(),
                name: new.name.clone(),
                description: new.description.clone(),
                url: new.url.clone(),
            };
            ctx.insert(&record)?;
            debug!(attachment_id = %record.id, "attachment created");
            Ok(record.into())
        })
    }

    pub fn task_attachments(
        &self,
        session: &Session,
        task_id: &str,
    ) -> Result<Vec<Attachment>, EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&read_task(&task))?;
            Ok(ctx
                .scan_where::<AttachmentRecord>(|a| a.task_id.as_deref() == Some(task_id))?
                .into_iter()
                .map(Attachment::from)
                .collect())
        })
    }

    /// Complete a task. The given variables are written to its process
    /// instance; completing the last task completes the instance and its
    /// case.
    pub fn complete(
        &self,
        session: &Session,
        task_id: &str,
        variables: Variables,
    ) -> Result<(), EngineError> {
        self.engine.execute(session, |ctx| {
            let task = require_task(ctx, task_id)?;
            ctx.check_any(&update_task(&task))?;
            let pid = task.process_instance_id.clone();
            lifecycle::write_variables(ctx, &pid, &variables)?;
            lifecycle::remove_task(ctx, &task.id)?;
            info!(task_id, process_instance_id = %pid, "task completed");

            let remaining = ctx.scan_where::<TaskRecord>(|t| t.process_instance_id == pid)?;
            if remaining.is_empty() {
                lifecycle::close(ctx, InstanceRef::Process(&pid), Closure::Complete)?;
            }
            Ok(())
        })
    }
}
