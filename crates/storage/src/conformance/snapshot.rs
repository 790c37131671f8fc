use super::{make_task, make_user, seed_users, TestResult};
use crate::record::{TaskRecord, UserRecord};
use crate::EngineStorage;

pub(super) fn run_snapshot_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "insert_not_visible_before_commit",
            insert_not_visible_before_commit(factory),
        ),
        TestResult::from_result(
            "snapshot",
            "insert_not_visible_after_abort",
            insert_not_visible_after_abort(factory),
        ),
        TestResult::from_result(
            "snapshot",
            "update_not_visible_before_commit",
            update_not_visible_before_commit(factory),
        ),
        TestResult::from_result(
            "snapshot",
            "delete_hidden_within_snapshot_only",
            delete_hidden_within_snapshot_only(factory),
        ),
        TestResult::from_result(
            "snapshot",
            "dropped_snapshot_is_rolled_back",
            dropped_snapshot_is_rolled_back(factory),
        ),
    ]
}

fn insert_not_visible_before_commit<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_task("t-1", "pi-1"))
        .map_err(|e| e.to_string())?;
    let outside: Option<TaskRecord> = s.fetch("t-1").map_err(|e| e.to_string())?;
    if outside.is_some() {
        return Err("uncommitted insert visible outside snapshot".to_string());
    }
    s.commit_snapshot(snap).map_err(|e| e.to_string())
}

fn insert_not_visible_after_abort<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_task("t-1", "pi-1"))
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).map_err(|e| e.to_string())?;
    let after: Option<TaskRecord> = s.fetch("t-1").map_err(|e| e.to_string())?;
    if after.is_some() {
        return Err("aborted insert became visible".to_string());
    }
    Ok(())
}

fn update_not_visible_before_commit<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;

    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    let mut renamed = make_user("alice");
    renamed.display_name = "Alice Liddell".to_string();
    s.update(&mut snap, &renamed).map_err(|e| e.to_string())?;

    let inside: Option<UserRecord> = s.get(&snap, "alice").map_err(|e| e.to_string())?;
    let outside: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    if inside.as_ref().map(|u| u.display_name.as_str()) != Some("Alice Liddell") {
        return Err(format!("snapshot does not see its own update: {inside:?}"));
    }
    if outside.as_ref().map(|u| u.display_name.as_str()) != Some("User alice") {
        return Err(format!("uncommitted update leaked: {outside:?}"));
    }
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let committed: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    if committed.map(|u| u.display_name) != Some("Alice Liddell".to_string()) {
        return Err("committed update not visible".to_string());
    }
    Ok(())
}

fn delete_hidden_within_snapshot_only<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;

    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.delete::<UserRecord>(&mut snap, "alice")
        .map_err(|e| e.to_string())?;
    let inside: Option<UserRecord> = s.get(&snap, "alice").map_err(|e| e.to_string())?;
    let outside: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    if inside.is_some() {
        return Err("deleted record still visible inside snapshot".to_string());
    }
    if outside.is_none() {
        return Err("uncommitted delete leaked".to_string());
    }
    s.abort_snapshot(snap).map_err(|e| e.to_string())
}

fn dropped_snapshot_is_rolled_back<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    {
        let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
        s.insert(&mut snap, &make_user("ghost"))
            .map_err(|e| e.to_string())?;
    }
    let after: Option<UserRecord> = s.fetch("ghost").map_err(|e| e.to_string())?;
    if after.is_some() {
        return Err("dropped snapshot was committed".to_string());
    }
    Ok(())
}
