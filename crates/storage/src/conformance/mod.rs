//! Conformance test suite for `EngineStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `EngineStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Insert**: record creation, duplicate detection, table independence
//! - **Snapshot isolation**: uncommitted writes invisible, own writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots
//! - **Concurrency**: stale snapshots conflict, exactly one racer wins
//! - **Error handling**: correct error variants for invalid operations
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use procflow_storage::conformance::run_conformance_suite;
//!
//! #[test]
//! fn file_backend_conformance() {
//!     let report = run_conformance_suite(FileStorage::temporary);
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod insert;
mod snapshot;

use std::fmt;

use crate::record::{GroupRecord, MembershipRecord, TaskRecord, UserRecord};
use crate::EngineStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "insert", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_visible_after_commit").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub fn run_conformance_suite<S, F>(factory: F) -> ConformanceReport
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.extend(insert::run_insert_tests(&factory));
    results.extend(error::run_error_tests(&factory));
    results.extend(snapshot::run_snapshot_tests(&factory));
    results.extend(commit::run_commit_tests(&factory));
    results.extend(concurrent::run_concurrent_tests(&factory));

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_user(id: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        display_name: format!("User {id}"),
        email: None,
    }
}

fn make_group(id: &str) -> GroupRecord {
    GroupRecord {
        id: id.to_string(),
        name: format!("Group {id}"),
    }
}

fn make_membership(user_id: &str, group_id: &str) -> MembershipRecord {
    MembershipRecord {
        user_id: user_id.to_string(),
        group_id: group_id.to_string(),
    }
}

fn make_task(id: &str, process_instance_id: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        name: Some("Review".to_string()),
        task_definition_key: "review".to_string(),
        execution_id: process_instance_id.to_string(),
        process_instance_id: process_instance_id.to_string(),
        process_definition_key: "testProcess".to_string(),
        sequence: 1,
    }
}

/// Insert one user per id in a fresh snapshot and commit it.
fn seed_users<S: EngineStorage>(s: &S, ids: &[&str]) -> Result<(), String> {
    let mut snap = s.begin_snapshot().map_err(|e| format!("begin: {e}"))?;
    for id in ids {
        s.insert(&mut snap, &make_user(id))
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    s.commit_snapshot(snap).map_err(|e| format!("commit: {e}"))
}
