//! Message correlation: deliver a named message to the instances waiting
//! for it and close them.

use std::fmt;

use procflow_storage::{
    CaseInstanceRecord, EngineStorage, EventSubscriptionRecord, InstanceKind,
    ProcessInstanceRecord, SubscriptionAction,
};
use tracing::info;

use crate::authorization::Required;
use crate::case::update_case;
use crate::engine::{CommandContext, ProcessEngine};
use crate::error::EngineError;
use crate::identity::Session;
use crate::lifecycle::{self, InstanceRef};
use crate::runtime::update_instance;

/// The instance a message was delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationTarget {
    ProcessInstance(String),
    CaseInstance(String),
}

impl CorrelationTarget {
    fn instance(&self) -> InstanceRef<'_> {
        match self {
            CorrelationTarget::ProcessInstance(id) => InstanceRef::Process(id),
            CorrelationTarget::CaseInstance(id) => InstanceRef::Case(id),
        }
    }
}

impl fmt::Display for CorrelationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationTarget::ProcessInstance(id) => write!(f, "process instance '{}'", id),
            CorrelationTarget::CaseInstance(id) => write!(f, "case instance '{}'", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationResult {
    pub message_name: String,
    pub target: CorrelationTarget,
    pub action: SubscriptionAction,
}

/// Narrows and delivers one message.
pub struct MessageCorrelationBuilder<'e, S: EngineStorage> {
    engine: &'e ProcessEngine<S>,
    message_name: String,
    process_instance_id: Option<String>,
    case_instance_id: Option<String>,
}

/// A matched subscription with what the caller needs to act on it.
struct Match {
    subscription: EventSubscriptionRecord,
    required: Vec<Required>,
}

impl Match {
    fn target(&self) -> CorrelationTarget {
        let id = self.subscription.target_id.clone();
        match self.subscription.target_kind {
            InstanceKind::Process => CorrelationTarget::ProcessInstance(id),
            InstanceKind::Case => CorrelationTarget::CaseInstance(id),
        }
    }
}

impl<'e, S: EngineStorage> MessageCorrelationBuilder<'e, S> {
    pub(crate) fn new(engine: &'e ProcessEngine<S>, message_name: String) -> Self {
        Self {
            engine,
            message_name,
            process_instance_id: None,
            case_instance_id: None,
        }
    }

    /// Only deliver to this process instance or its case.
    pub fn process_instance_id(mut self, id: impl Into<String>) -> Self {
        self.process_instance_id = Some(id.into());
        self
    }

    /// Only deliver to this case instance or its process.
    pub fn case_instance_id(mut self, id: impl Into<String>) -> Self {
        self.case_instance_id = Some(id.into());
        self
    }

    /// Deliver to exactly one waiting instance.
    ///
    /// Zero or several matches fail with `MismatchingCorrelation` and change
    /// nothing.
    pub fn correlate(&self, session: &Session) -> Result<CorrelationResult, EngineError> {
        self.engine.execute(session, |ctx| {
            let mut matches = self.find_matches(ctx)?;
            if matches.len() != 1 {
                return Err(EngineError::MismatchingCorrelation {
                    message_name: self.message_name.clone(),
                    matched: matches.len(),
                });
            }
            let m = matches.remove(0);
            ctx.check_any(&m.required)?;
            let target = m.target();
            lifecycle::close(ctx, target.instance(), m.subscription.action.into())?;
            info!(message = %self.message_name, target = ?target, "message correlated");
            Ok(CorrelationResult {
                message_name: self.message_name.clone(),
                target,
                action: m.subscription.action,
            })
        })
    }

    /// Deliver to every waiting instance and return how many matched.
    ///
    /// Every target is authorized before any of them is closed.
    pub fn correlate_all(&self, session: &Session) -> Result<usize, EngineError> {
        self.engine.execute(session, |ctx| {
            let matches = self.find_matches(ctx)?;
            for m in &matches {
                ctx.check_any(&m.required)?;
            }
            for m in &matches {
                let target = m.target();
                // A cascade from an earlier match may already have closed it.
                if is_active(ctx, &target)? {
                    lifecycle::close(ctx, target.instance(), m.subscription.action.into())?;
                }
            }
            info!(message = %self.message_name, matched = matches.len(), "message correlated to all");
            Ok(matches.len())
        })
    }

    fn find_matches(&self, ctx: &CommandContext<'_, S>) -> Result<Vec<Match>, EngineError> {
        let subscriptions = ctx
            .scan_where::<EventSubscriptionRecord>(|s| s.message_name == self.message_name)?;
        let mut matches = Vec::new();
        for subscription in subscriptions {
            let (process, case) = match subscription.target_kind {
                InstanceKind::Process => {
                    lifecycle::family(ctx, InstanceRef::Process(&subscription.target_id))?
                }
                InstanceKind::Case => {
                    lifecycle::family(ctx, InstanceRef::Case(&subscription.target_id))?
                }
            };
            if !self.in_scope(process.as_ref(), case.as_ref()) {
                continue;
            }
            let required = match subscription.target_kind {
                InstanceKind::Process => process.as_ref().map(|p| update_instance(p).to_vec()),
                InstanceKind::Case => case.as_ref().map(|c| update_case(c).to_vec()),
            }
            .unwrap_or_default();
            matches.push(Match {
                subscription,
                required,
            });
        }
        Ok(matches)
    }

    fn in_scope(
        &self,
        process: Option<&ProcessInstanceRecord>,
        case: Option<&CaseInstanceRecord>,
    ) -> bool {
        let process_ok = self
            .process_instance_id
            .as_deref()
            .map_or(true, |id| process.is_some_and(|p| p.id == id));
        let case_ok = self
            .case_instance_id
            .as_deref()
            .map_or(true, |id| case.is_some_and(|c| c.id == id));
        process_ok && case_ok
    }
}

fn is_active<S: EngineStorage>(
    ctx: &CommandContext<'_, S>,
    target: &CorrelationTarget,
) -> Result<bool, EngineError> {
    Ok(match target {
        CorrelationTarget::ProcessInstance(id) => ctx
            .get::<ProcessInstanceRecord>(id)?
            .is_some_and(|p| p.state == procflow_storage::ProcessInstanceState::Active),
        CorrelationTarget::CaseInstance(id) => ctx
            .get::<CaseInstanceRecord>(id)?
            .is_some_and(|c| !c.state.is_terminal()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::Variables;
    use serde_json::json;

    fn engine() -> ProcessEngine {
        let engine = ProcessEngine::in_memory(EngineConfig::default());
        engine
            .repository_service()
            .create_deployment()
            .add_json_resource(
                "process.json",
                &json!({
                    "kind": "Process",
                    "key": "order",
                    "tasks": [{ "key": "pack" }],
                    "messages": [{ "name": "cancel", "action": "terminate" }]
                }),
            )
            .deploy(&Session::new())
            .unwrap();
        engine
    }

    #[test]
    fn narrowing_picks_one_of_many() {
        let engine = engine();
        let system = Session::new();
        let runtime = engine.runtime_service();
        let a = runtime
            .start_process_instance_by_key(&system, "order", Variables::new())
            .unwrap();
        let b = runtime
            .start_process_instance_by_key(&system, "order", Variables::new())
            .unwrap();

        let err = runtime.correlate_message(&system, "cancel").unwrap_err();
        assert!(matches!(
            err,
            EngineError::MismatchingCorrelation { matched: 2, .. }
        ));

        let result = runtime
            .create_message_correlation("cancel")
            .process_instance_id(&b.id)
            .correlate(&system)
            .unwrap();
        assert_eq!(result.target, CorrelationTarget::ProcessInstance(b.id.clone()));
        assert_eq!(result.action, SubscriptionAction::Terminate);

        let still_active = runtime.process_instance(&system, &a.id).unwrap().unwrap();
        assert!(!still_active.is_ended());
    }

    #[test]
    fn closed_instances_no_longer_match() {
        let engine = engine();
        let system = Session::new();
        let runtime = engine.runtime_service();
        runtime
            .start_process_instance_by_key(&system, "order", Variables::new())
            .unwrap();
        runtime.correlate_message(&system, "cancel").unwrap();
        let err = runtime.correlate_message(&system, "cancel").unwrap_err();
        assert!(matches!(
            err,
            EngineError::MismatchingCorrelation { matched: 0, .. }
        ));
    }
}
