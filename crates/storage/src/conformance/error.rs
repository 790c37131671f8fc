use super::{make_task, TestResult};
use crate::record::{Record, TaskRecord, UserRecord};
use crate::{EngineStorage, StorageError};

pub(super) fn run_error_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "error",
            "get_nonexistent_is_none",
            get_nonexistent_is_none(factory),
        ),
        TestResult::from_result(
            "error",
            "fetch_all_empty_table",
            fetch_all_empty_table(factory),
        ),
        TestResult::from_result(
            "error",
            "update_nonexistent_returns_not_found",
            update_nonexistent_returns_not_found(factory),
        ),
        TestResult::from_result(
            "error",
            "delete_nonexistent_returns_not_found",
            delete_nonexistent_returns_not_found(factory),
        ),
    ]
}

/// Missing keys read as `None`, not as an error.
fn get_nonexistent_is_none<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    let inside: Option<UserRecord> = s.get(&snap, "ghost").map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).map_err(|e| e.to_string())?;
    let outside: Option<UserRecord> = s.fetch("ghost").map_err(|e| e.to_string())?;
    if inside.is_some() || outside.is_some() {
        return Err("expected None for missing key".to_string());
    }
    Ok(())
}

/// A table that was never written scans as empty.
fn fetch_all_empty_table<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let tasks: Vec<TaskRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    if !tasks.is_empty() {
        return Err(format!("expected no tasks, got {}", tasks.len()));
    }
    Ok(())
}

/// Updating a record that does not exist fails with NotFound naming the key.
fn update_nonexistent_returns_not_found<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    match s.update(&mut snap, &make_task("t-1", "pi-1")) {
        Err(StorageError::NotFound { table, key }) => {
            if table != TaskRecord::TABLE || key != "t-1" {
                return Err(format!("wrong fields: table={table}, key={key}"));
            }
            Ok(())
        }
        Ok(()) => Err("expected NotFound, got Ok".to_string()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
    }
}

/// Deleting a record that does not exist fails with NotFound.
fn delete_nonexistent_returns_not_found<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    match s.delete::<TaskRecord>(&mut snap, "t-404") {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Ok(()) => Err("expected NotFound, got Ok".to_string()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
    }
}
