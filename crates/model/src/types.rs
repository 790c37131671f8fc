//! Typed structs for process and case definition resources.
//!
//! Leaf types derive serde directly. [`Definition`] is dispatched by hand in
//! [`crate::deserialize`] so that errors name the offending key, but it
//! serializes with the same `kind` tag it was read from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a deployed definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DefinitionKind {
    Process,
    Case,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionKind::Process => "Process",
            DefinitionKind::Case => "Case",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DefinitionKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Process" => Ok(DefinitionKind::Process),
            "Case" => Ok(DefinitionKind::Case),
            _ => Err(()),
        }
    }
}

/// What happens to a waiting instance when its message is correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    /// Forced closure: process ends as terminated, case becomes TERMINATED.
    Terminate,
    /// Normal closure: process ends as completed, case becomes COMPLETED.
    Complete,
}

impl MessageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageAction::Terminate => "terminate",
            MessageAction::Complete => "complete",
        }
    }
}

impl fmt::Display for MessageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message the instance waits on while it is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub name: String,
    pub action: MessageAction,
}

/// A user task created when the process instance starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskModel {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ── Process ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Key of the case definition started alongside every instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_case: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskModel>,
    #[serde(default)]
    pub messages: Vec<MessageEvent>,
}

// ── Case ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseModel {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageEvent>,
}

/// A parsed definition resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Definition {
    Process(ProcessModel),
    Case(CaseModel),
}

impl Definition {
    pub fn key(&self) -> &str {
        match self {
            Definition::Process(p) => &p.key,
            Definition::Case(c) => &c.key,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Definition::Process(p) => p.name.as_deref(),
            Definition::Case(c) => c.name.as_deref(),
        }
    }

    pub fn kind(&self) -> DefinitionKind {
        match self {
            Definition::Process(_) => DefinitionKind::Process,
            Definition::Case(_) => DefinitionKind::Case,
        }
    }

    pub fn messages(&self) -> &[MessageEvent] {
        match self {
            Definition::Process(p) => &p.messages,
            Definition::Case(c) => &c.messages,
        }
    }

    pub fn as_process(&self) -> Option<&ProcessModel> {
        match self {
            Definition::Process(p) => Some(p),
            Definition::Case(_) => None,
        }
    }

    pub fn as_case(&self) -> Option<&CaseModel> {
        match self {
            Definition::Case(c) => Some(c),
            Definition::Process(_) => None,
        }
    }
}
