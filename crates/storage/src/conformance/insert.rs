use super::{make_group, make_membership, make_user, seed_users, TestResult};
use crate::record::{GroupRecord, MembershipRecord, Record, UserRecord};
use crate::{EngineStorage, StorageError};

pub(super) fn run_insert_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "insert",
            "insert_readable_within_snapshot",
            insert_readable_within_snapshot(factory),
        ),
        TestResult::from_result(
            "insert",
            "insert_visible_after_commit",
            insert_visible_after_commit(factory),
        ),
        TestResult::from_result(
            "insert",
            "double_insert_returns_already_exists",
            double_insert_returns_already_exists(factory),
        ),
        TestResult::from_result(
            "insert",
            "double_insert_across_snapshots",
            double_insert_across_snapshots(factory),
        ),
        TestResult::from_result(
            "insert",
            "tables_are_independent",
            tables_are_independent(factory),
        ),
        TestResult::from_result(
            "insert",
            "composite_keys_address_single_rows",
            composite_keys_address_single_rows(factory),
        ),
        TestResult::from_result(
            "insert",
            "scan_returns_key_order",
            scan_returns_key_order(factory),
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A freshly inserted record is readable through the same snapshot.
fn insert_readable_within_snapshot<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_user("alice"))
        .map_err(|e| e.to_string())?;
    let rec: Option<UserRecord> = s.get(&snap, "alice").map_err(|e| e.to_string())?;
    if rec != Some(make_user("alice")) {
        return Err(format!("expected alice within snapshot, got {rec:?}"));
    }
    s.abort_snapshot(snap).map_err(|e| e.to_string())
}

/// After insert + commit, `fetch` returns the record.
fn insert_visible_after_commit<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;
    let rec: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    match rec {
        Some(u) if u.display_name == "User alice" => Ok(()),
        other => Err(format!("expected committed alice, got {other:?}")),
    }
}

/// Inserting the same key twice in one snapshot fails with AlreadyExists.
fn double_insert_returns_already_exists<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_group("ops"))
        .map_err(|e| e.to_string())?;
    match s.insert(&mut snap, &make_group("ops")) {
        Err(StorageError::AlreadyExists { table, key }) => {
            if table != GroupRecord::TABLE || key != "ops" {
                return Err(format!("wrong fields: table={table}, key={key}"));
            }
            Ok(())
        }
        Ok(()) => Err("expected AlreadyExists, got Ok".to_string()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
    }
}

/// A key committed earlier cannot be inserted again by a later snapshot.
fn double_insert_across_snapshots<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    match s.insert(&mut snap, &make_user("alice")) {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Ok(()) => Err("expected AlreadyExists, got Ok".to_string()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
    }
}

/// The same key in two different tables refers to two different records.
fn tables_are_independent<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_user("shared"))
        .map_err(|e| e.to_string())?;
    s.insert(&mut snap, &make_group("shared"))
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let users: Vec<UserRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    let groups: Vec<GroupRecord> = s.fetch_all().map_err(|e| e.to_string())?;
    if users.len() != 1 || groups.len() != 1 {
        return Err(format!(
            "expected one user and one group, got {} and {}",
            users.len(),
            groups.len()
        ));
    }
    Ok(())
}

/// Composite-key records are addressable by their full key.
fn composite_keys_address_single_rows<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    let a = make_membership("alice", "ops");
    let b = make_membership("alice", "dev");
    s.insert(&mut snap, &a).map_err(|e| e.to_string())?;
    s.insert(&mut snap, &b).map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).map_err(|e| e.to_string())?;

    let got: Option<MembershipRecord> = s.fetch(&a.key()).map_err(|e| e.to_string())?;
    if got != Some(a) {
        return Err(format!("expected alice/ops membership, got {got:?}"));
    }
    Ok(())
}

/// `scan` and `fetch_all` return records ordered by key.
fn scan_returns_key_order<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["carol", "alice", "bob"])?;
    let snap = s.begin_snapshot().map_err(|e| e.to_string())?;
    let scanned: Vec<UserRecord> = s.scan(&snap).map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).map_err(|e| e.to_string())?;
    let ids: Vec<&str> = scanned.iter().map(|u| u.id.as_str()).collect();
    if ids != ["alice", "bob", "carol"] {
        return Err(format!("expected key order, got {ids:?}"));
    }
    Ok(())
}
