use super::{make_group, make_membership, make_task, make_user, seed_users, TestResult};
use crate::record::{GroupRecord, MembershipRecord, TaskRecord, UserRecord};
use crate::{EngineStorage, StorageError};

pub(super) fn run_commit_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "commit",
            "multi_table_commit_all_visible",
            multi_table_commit_all_visible(factory),
        ),
        TestResult::from_result(
            "commit",
            "abort_discards_every_write",
            abort_discards_every_write(factory),
        ),
        TestResult::from_result(
            "commit",
            "failed_write_does_not_poison_snapshot",
            failed_write_does_not_poison_snapshot(factory),
        ),
        TestResult::from_result(
            "commit",
            "delete_then_reinsert_in_one_snapshot",
            delete_then_reinsert_in_one_snapshot(factory),
        ),
    ]
}

/// Records written to several tables in one snapshot appear together.
fn multi_table_commit_all_visible<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_user("alice"))
        .map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_group("ops"))
        .map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_membership("alice", "ops"))
        .map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_task("t-1", "pi-1"))
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let users: Vec<UserRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    let groups: Vec<GroupRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    let memberships: Vec<MembershipRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    let tasks: Vec<TaskRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    if users.len() + groups.len() + memberships.len() + tasks.len() != 4 {
        return Err("not every record of the commit is visible".to_string());
    }
    Ok(())
}

/// An aborted snapshot leaves inserts, updates and deletes unapplied.
fn abort_discards_every_write<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice", "bob"])?;

    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_user("carol"))
        .map_err(|e| e.to_string())?;
    let mut renamed = make_user("alice");
    renamed.display_name = "renamed".to_string();
    s.update(&mut snap, &renamed).map_err(|e| e.to_string())?;
    s.delete::<UserRecord>(&mut snap, "bob")
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).map_err(|e| e.to_string())?;

    let users: Vec<UserRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    if ids != ["alice", "bob"] {
        return Err(format!("expected [alice, bob] after abort, got {ids:?}"));
    }
    if users[0].display_name != "User alice" {
        return Err("aborted update was applied".to_string());
    }
    Ok(())
}

/// A rejected write inside a snapshot does not stop the rest from committing.
fn failed_write_does_not_poison_snapshot<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;

    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    match s.insert(&mut snap, &make_user("alice")) {
        Err(StorageError::AlreadyExists { .. }) => {}
        other => return Err(format!("expected AlreadyExists, got {other:?}")),
    }
    s.insert(&mut snap, &make_user("bob"))
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let bob: Option<UserRecord> = s.fetch("bob").map_err(|e| e.to_string())?;
    if bob.is_none() {
        return Err("write after a rejected write was lost".to_string());
    }
    Ok(())
}

fn delete_then_reinsert_in_one_snapshot<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;

    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.delete::<UserRecord>(&mut snap, "alice")
        .map_err(|e| e.to_string())?;
    let mut again = make_user("alice");
    again.email = Some("alice@example.com".to_string());
    s.insert(&mut snap, &again).map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let got: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    if got.and_then(|u| u.email).as_deref() != Some("alice@example.com") {
        return Err("re-inserted record not committed".to_string());
    }
    Ok(())
}
