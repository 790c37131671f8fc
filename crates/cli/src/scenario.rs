//! Scripted scenarios: a list of engine operations run in order against a
//! fresh in-memory engine, each optionally expected to fail with a given
//! kind of error.
//!
//! ```json
//! {
//!   "name": "attachment-auth",
//!   "resources": ["testProcess.json"],
//!   "steps": [
//!     { "op": "create_user", "id": "testUser" },
//!     { "op": "start", "key": "testProcess", "as": "pi" },
//!     { "op": "set_task_variable", "process_instance": "$pi",
//!       "name": "test", "value": "test", "expect_error": "authorization" }
//!   ]
//! }
//! ```
//!
//! Ids returned by `start` and `create_case` can be bound with `as` and
//! referenced later as `$alias`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use procflow_engine::{
    Authentication, AuthorizationType, EngineConfig, EngineError, NewAttachment, NewAuthorization,
    NewGroup, NewUser, Permission, ProcessEngine, Resource, Session, Task, Variables,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    /// Definition resources deployed before the first step, relative to
    /// the scenario file.
    #[serde(default)]
    pub resources: Vec<PathBuf>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub expect_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Action {
    CreateUser {
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
    CreateGroup {
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
    CreateMembership {
        user: String,
        group: String,
    },
    EnableAuthorization,
    DisableAuthorization,
    Grant {
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        global: bool,
        resource: String,
        #[serde(default = "any_resource")]
        resource_id: String,
        permissions: Vec<String>,
    },
    /// Authenticate as `user`. Without `groups`, the user's memberships are
    /// looked up.
    Authenticate {
        user: String,
        #[serde(default)]
        groups: Option<Vec<String>>,
    },
    ClearAuthentication,
    Start {
        key: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
        #[serde(default)]
        variables: Variables,
    },
    CreateCase {
        key: String,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },
    SetTaskVariable {
        process_instance: String,
        #[serde(default)]
        task: Option<String>,
        name: String,
        value: serde_json::Value,
    },
    CreateAttachment {
        process_instance: String,
        #[serde(default)]
        task: Option<String>,
        #[serde(rename = "type")]
        attachment_type: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    CompleteTask {
        process_instance: String,
        #[serde(default)]
        task: Option<String>,
        #[serde(default)]
        variables: Variables,
    },
    Correlate {
        message: String,
        #[serde(default)]
        process_instance: Option<String>,
        #[serde(default)]
        case_instance: Option<String>,
        #[serde(default)]
        all: bool,
    },
    DeleteProcessInstance {
        process_instance: String,
        #[serde(default)]
        reason: Option<String>,
    },
    CompleteCase {
        case_instance: String,
    },
    TerminateCase {
        case_instance: String,
    },
    /// Counts checked as the system, ignoring authorization.
    Expect {
        #[serde(default)]
        process_instances: Option<usize>,
        #[serde(default)]
        active_process_instances: Option<usize>,
        #[serde(default)]
        case_instances: Option<usize>,
        #[serde(default)]
        active_case_instances: Option<usize>,
        #[serde(default)]
        terminated_case_instances: Option<usize>,
        #[serde(default)]
        tasks: Option<usize>,
    },
}

fn any_resource() -> String {
    procflow_engine::ANY.to_string()
}

impl Action {
    pub fn op(&self) -> &'static str {
        match self {
            Action::CreateUser { .. } => "create_user",
            Action::CreateGroup { .. } => "create_group",
            Action::CreateMembership { .. } => "create_membership",
            Action::EnableAuthorization => "enable_authorization",
            Action::DisableAuthorization => "disable_authorization",
            Action::Grant { .. } => "grant",
            Action::Authenticate { .. } => "authenticate",
            Action::ClearAuthentication => "clear_authentication",
            Action::Start { .. } => "start",
            Action::CreateCase { .. } => "create_case",
            Action::SetTaskVariable { .. } => "set_task_variable",
            Action::CreateAttachment { .. } => "create_attachment",
            Action::CompleteTask { .. } => "complete_task",
            Action::Correlate { .. } => "correlate",
            Action::DeleteProcessInstance { .. } => "delete_process_instance",
            Action::CompleteCase { .. } => "complete_case",
            Action::TerminateCase { .. } => "terminate_case",
            Action::Expect { .. } => "expect",
        }
    }
}

/// The kind of engine error a step expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    Authorization,
    MismatchingCorrelation,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    IllegalTransition,
    Definition,
    Storage,
}

impl ErrorKind {
    pub fn of(err: &EngineError) -> Self {
        match err {
            EngineError::Authorization { .. } => ErrorKind::Authorization,
            EngineError::MismatchingCorrelation { .. } => ErrorKind::MismatchingCorrelation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            EngineError::Definition(_) => ErrorKind::Definition,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::MismatchingCorrelation => "mismatching_correlation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::IllegalTransition => "illegal_transition",
            ErrorKind::Definition => "definition",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a scenario stopped.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ScenarioError {
    #[error("error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error parsing scenario '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("deployment failed: {0}")]
    Deploy(EngineError),
    #[error("step {index} ({op}) failed: {source}")]
    Step {
        index: usize,
        op: &'static str,
        source: EngineError,
    },
    #[error("step {index} ({op}) succeeded, expected {expected} error")]
    UnexpectedSuccess {
        index: usize,
        op: &'static str,
        expected: ErrorKind,
    },
    #[error("step {index} ({op}) failed with {actual} error, expected {expected}: {source}")]
    WrongError {
        index: usize,
        op: &'static str,
        expected: ErrorKind,
        actual: ErrorKind,
        source: EngineError,
    },
    #[error("step {index} ({op}): {message}")]
    Invalid {
        index: usize,
        op: &'static str,
        message: String,
    },
    #[error("step {index} (expect): {what} is {actual}, expected {expected}")]
    Expectation {
        index: usize,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What one step did.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StepReport {
    pub index: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step-level failures that are not engine errors.
enum Failure {
    Engine(EngineError),
    Invalid(String),
    Expectation {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        Failure::Engine(err)
    }
}

/// Runs scenario steps against one engine and one session.
pub(crate) struct ScenarioRunner {
    engine: ProcessEngine,
    session: Session,
    aliases: BTreeMap<String, String>,
}

impl ScenarioRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: ProcessEngine::in_memory(config),
            session: Session::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Deploy `scenario.resources` (resolved against `base_dir`) and run
    /// every step, stopping at the first one that does not go as expected.
    pub fn run(
        &mut self,
        scenario: &Scenario,
        base_dir: &Path,
    ) -> Result<Vec<StepReport>, ScenarioError> {
        if !scenario.resources.is_empty() {
            self.deploy(scenario, base_dir)?;
        }
        let mut reports = Vec::with_capacity(scenario.steps.len());
        for (i, step) in scenario.steps.iter().enumerate() {
            reports.push(self.run_step(i + 1, step)?);
        }
        Ok(reports)
    }

    fn deploy(&self, scenario: &Scenario, base_dir: &Path) -> Result<(), ScenarioError> {
        let mut builder = self.engine.repository_service().create_deployment();
        if let Some(name) = &scenario.name {
            builder = builder.name(name.clone());
        }
        for resource in &scenario.resources {
            let path = base_dir.join(resource);
            let bytes = std::fs::read(&path).map_err(|source| ScenarioError::Io {
                path: path.clone(),
                source,
            })?;
            builder = builder.add_resource(resource.display().to_string(), bytes);
        }
        let deployment = builder
            .deploy(&Session::new())
            .map_err(ScenarioError::Deploy)?;
        debug!(deployment_id = %deployment.id, "scenario resources deployed");
        Ok(())
    }

    fn run_step(&mut self, index: usize, step: &Step) -> Result<StepReport, ScenarioError> {
        let op = step.action.op();
        let outcome = self.apply(&step.action);
        match (outcome, step.expect_error) {
            (Ok(result), None) => Ok(StepReport {
                index,
                op,
                result,
                expected_error: None,
                error: None,
            }),
            (Ok(_), Some(expected)) => Err(ScenarioError::UnexpectedSuccess {
                index,
                op,
                expected,
            }),
            (Err(Failure::Engine(err)), Some(expected)) => {
                let actual = ErrorKind::of(&err);
                if actual == expected {
                    Ok(StepReport {
                        index,
                        op,
                        result: None,
                        expected_error: Some(expected),
                        error: Some(err.to_string()),
                    })
                } else {
                    Err(ScenarioError::WrongError {
                        index,
                        op,
                        expected,
                        actual,
                        source: err,
                    })
                }
            }
            (Err(Failure::Engine(source)), None) => {
                Err(ScenarioError::Step { index, op, source })
            }
            (Err(Failure::Invalid(message)), _) => {
                Err(ScenarioError::Invalid { index, op, message })
            }
            (
                Err(Failure::Expectation {
                    what,
                    expected,
                    actual,
                }),
                _,
            ) => Err(ScenarioError::Expectation {
                index,
                what,
                expected,
                actual,
            }),
        }
    }

    fn resolve(&self, reference: &str) -> Result<String, Failure> {
        match reference.strip_prefix('$') {
            Some(alias) => self
                .aliases
                .get(alias)
                .cloned()
                .ok_or_else(|| Failure::Invalid(format!("unknown alias '${}'", alias))),
            None => Ok(reference.to_string()),
        }
    }

    fn bind(&mut self, alias: Option<&String>, id: &str) {
        if let Some(alias) = alias {
            self.aliases.insert(alias.clone(), id.to_string());
        }
    }

    /// The single open task of a process instance, optionally by key.
    fn task_of(&self, process_instance: &str, task_key: Option<&str>) -> Result<Task, Failure> {
        let pid = self.resolve(process_instance)?;
        let mut query = self.engine.task_service().task_query().execution_id(&pid);
        if let Some(key) = task_key {
            query = query.task_definition_key(key);
        }
        let mut tasks = query.list(&Session::new())?;
        match tasks.len() {
            1 => Ok(tasks.remove(0)),
            n => Err(Failure::Invalid(format!(
                "process instance '{}' has {} matching tasks, expected exactly one",
                pid, n
            ))),
        }
    }

    fn apply(&mut self, action: &Action) -> Result<Option<String>, Failure> {
        let session = self.session.clone();
        match action {
            Action::CreateUser { id, name } => {
                let mut new = NewUser::new(id);
                if let Some(name) = name {
                    new = new.display_name(name);
                }
                self.engine.identity_service().create_user(&session, new)?;
                Ok(None)
            }
            Action::CreateGroup { id, name } => {
                let mut new = NewGroup::new(id);
                if let Some(name) = name {
                    new = new.name(name);
                }
                self.engine.identity_service().create_group(&session, new)?;
                Ok(None)
            }
            Action::CreateMembership { user, group } => {
                self.engine
                    .identity_service()
                    .create_membership(&session, user, group)?;
                Ok(None)
            }
            Action::EnableAuthorization => {
                self.engine.set_authorization_enabled(true);
                Ok(None)
            }
            Action::DisableAuthorization => {
                self.engine.set_authorization_enabled(false);
                Ok(None)
            }
            Action::Grant {
                user,
                group,
                global,
                resource,
                resource_id,
                permissions,
            } => {
                let resource: Resource = resource
                    .parse()
                    .map_err(|()| Failure::Invalid(format!("unknown resource '{}'", resource)))?;
                let auth_type = if *global {
                    AuthorizationType::Global
                } else {
                    AuthorizationType::Grant
                };
                let mut new = NewAuthorization::new(auth_type)
                    .resource(resource)
                    .resource_id(resource_id);
                if let Some(user) = user {
                    new = new.user_id(user);
                }
                if let Some(group) = group {
                    new = new.group_id(group);
                }
                for name in permissions {
                    let permission: Permission = name.parse().map_err(|()| {
                        Failure::Invalid(format!("unknown permission '{}'", name))
                    })?;
                    new = new.add_permission(permission);
                }
                let saved = self
                    .engine
                    .authorization_service()
                    .save_authorization(&session, new)?;
                Ok(Some(saved.id))
            }
            Action::Authenticate { user, groups } => {
                let authentication = match groups {
                    Some(groups) => Authentication::new(user, groups.iter().cloned()),
                    None => self.engine.identity_service().authenticate(user)?,
                };
                self.session.set_authentication(authentication);
                Ok(None)
            }
            Action::ClearAuthentication => {
                self.session.clear_authentication();
                Ok(None)
            }
            Action::Start {
                key,
                alias,
                variables,
            } => {
                let pi = self.engine.runtime_service().start_process_instance_by_key(
                    &session,
                    key,
                    variables.clone(),
                )?;
                self.bind(alias.as_ref(), &pi.id);
                Ok(Some(pi.id))
            }
            Action::CreateCase { key, alias } => {
                let case = self
                    .engine
                    .case_service()
                    .create_case_instance_by_key(&session, key)?;
                self.bind(alias.as_ref(), &case.id);
                Ok(Some(case.id))
            }
            Action::SetTaskVariable {
                process_instance,
                task,
                name,
                value,
            } => {
                let task = self.task_of(process_instance, task.as_deref())?;
                self.engine
                    .task_service()
                    .set_variable(&session, &task.id, name, value.clone())?;
                Ok(None)
            }
            Action::CreateAttachment {
                process_instance,
                task,
                attachment_type,
                name,
                description,
                url,
            } => {
                let task = self.task_of(process_instance, task.as_deref())?;
                let mut new = NewAttachment::new(attachment_type, name)
                    .task(&task.id)
                    .process_instance(&task.process_instance_id);
                if let Some(description) = description {
                    new = new.description(description);
                }
                if let Some(url) = url {
                    new = new.url(url);
                }
                let attachment = self.engine.task_service().create_attachment(&session, new)?;
                Ok(Some(attachment.id))
            }
            Action::CompleteTask {
                process_instance,
                task,
                variables,
            } => {
                let task = self.task_of(process_instance, task.as_deref())?;
                self.engine
                    .task_service()
                    .complete(&session, &task.id, variables.clone())?;
                Ok(Some(task.id))
            }
            Action::Correlate {
                message,
                process_instance,
                case_instance,
                all,
            } => {
                let mut builder = self.engine.runtime_service().create_message_correlation(message);
                if let Some(pid) = process_instance {
                    builder = builder.process_instance_id(self.resolve(pid)?);
                }
                if let Some(cid) = case_instance {
                    builder = builder.case_instance_id(self.resolve(cid)?);
                }
                if *all {
                    let matched = builder.correlate_all(&session)?;
                    Ok(Some(format!("{} matched", matched)))
                } else {
                    let result = builder.correlate(&session)?;
                    Ok(Some(result.target.to_string()))
                }
            }
            Action::DeleteProcessInstance {
                process_instance,
                reason,
            } => {
                let pid = self.resolve(process_instance)?;
                self.engine.runtime_service().delete_process_instance(
                    &session,
                    &pid,
                    reason.as_deref(),
                )?;
                Ok(None)
            }
            Action::CompleteCase { case_instance } => {
                let cid = self.resolve(case_instance)?;
                let case = self
                    .engine
                    .case_service()
                    .complete_case_instance(&session, &cid)?;
                Ok(Some(case.state.to_string()))
            }
            Action::TerminateCase { case_instance } => {
                let cid = self.resolve(case_instance)?;
                let case = self
                    .engine
                    .case_service()
                    .terminate_case_instance(&session, &cid)?;
                Ok(Some(case.state.to_string()))
            }
            Action::Expect {
                process_instances,
                active_process_instances,
                case_instances,
                active_case_instances,
                terminated_case_instances,
                tasks,
            } => {
                self.expect_counts(&[
                    (process_instances, "process instances", Count::Processes),
                    (active_process_instances, "active process instances", Count::ActiveProcesses),
                    (case_instances, "case instances", Count::Cases),
                    (active_case_instances, "active case instances", Count::ActiveCases),
                    (terminated_case_instances, "terminated case instances", Count::TerminatedCases),
                    (tasks, "tasks", Count::Tasks),
                ])?;
                Ok(None)
            }
        }
    }

    fn expect_counts(
        &self,
        checks: &[(&Option<usize>, &'static str, Count)],
    ) -> Result<(), Failure> {
        for (expected, what, count) in checks {
            if let Some(expected) = **expected {
                let actual = self.count(*count)?;
                if actual != expected {
                    return Err(Failure::Expectation {
                        what: *what,
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn count(&self, count: Count) -> Result<usize, EngineError> {
        let system = Session::new();
        let runtime = self.engine.runtime_service();
        let cases = self.engine.case_service();
        match count {
            Count::Processes => runtime.process_instance_query().count(&system),
            Count::ActiveProcesses => runtime.process_instance_query().active().count(&system),
            Count::Cases => cases.case_instance_query().count(&system),
            Count::ActiveCases => cases.case_instance_query().active().count(&system),
            Count::TerminatedCases => cases
                .case_instance_query()
                .state(procflow_engine::CaseInstanceState::Terminated)
                .count(&system),
            Count::Tasks => self.engine.task_service().task_query().count(&system),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Count {
    Processes,
    ActiveProcesses,
    Cases,
    ActiveCases,
    TerminatedCases,
    Tasks,
}
