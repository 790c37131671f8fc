use std::sync::{Arc, Barrier};
use std::thread;

use super::{make_user, seed_users, TestResult};
use crate::record::UserRecord;
use crate::{EngineStorage, StorageError};

/// Number of racing threads in each test.
const N: usize = 8;

pub(super) fn run_concurrent_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "stale_snapshot_commit_conflicts",
            stale_snapshot_commit_conflicts(factory),
        ),
        TestResult::from_result(
            "concurrent",
            "conflict_leaves_winner_intact",
            conflict_leaves_winner_intact(factory),
        ),
        TestResult::from_result(
            "concurrent",
            "read_only_snapshot_never_conflicts",
            read_only_snapshot_never_conflicts(factory),
        ),
        TestResult::from_result(
            "concurrent",
            "racing_writers_exactly_one_wins",
            racing_writers_exactly_one_wins(factory),
        ),
    ]
}

/// Two snapshots begin together; the second to commit a write conflicts.
fn stale_snapshot_commit_conflicts<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let mut first = s.begin_snapshot().map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().map_err(|e| e.to_string())?;
    s.insert(&mut first, &make_user("alice"))
        .map_err(|e| e.to_string())?;
    s.insert(&mut second, &make_user("bob"))
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(first).map_err(|e| e.to_string())?;
    match s.commit_snapshot(second) {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        Ok(()) => Err("stale snapshot committed".to_string()),
        Err(e) => Err(format!("expected ConcurrentConflict, got {e}")),
    }
}

/// The losing commit must not disturb what the winner wrote.
fn conflict_leaves_winner_intact<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    seed_users(&s, &["alice"])?;

    let mut winner = s.begin_snapshot().map_err(|e| e.to_string())?;
    let mut loser = s.begin_snapshot().map_err(|e| e.to_string())?;
    let mut a = make_user("alice");
    a.display_name = "winner".to_string();
    let mut b = make_user("alice");
    b.display_name = "loser".to_string();
    s.update(&mut winner, &a).map_err(|e| e.to_string())?;
    s.update(&mut loser, &b).map_err(|e| e.to_string())?;
    s.commit_snapshot(winner).map_err(|e| e.to_string())?;
    let _ = s.commit_snapshot(loser);

    let got: Option<UserRecord> = s.fetch("alice").map_err(|e| e.to_string())?;
    match got {
        Some(u) if u.display_name == "winner" => Ok(()),
        other => Err(format!("expected winner's update, got {other:?}")),
    }
}

/// A snapshot that only read data commits even after another commit.
fn read_only_snapshot_never_conflicts<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let s = factory();
    let reader = s.begin_snapshot().map_err(|e| e.to_string())?;
    let _: Vec<UserRecord> = s.scan(&reader).map_err(|e| e.to_string())?;
    seed_users(&s, &["alice"])?;
    s.commit_snapshot(reader)
        .map_err(|e| format!("read-only commit failed: {e}"))
}

/// N threads race to insert their own user from the same starting point.
/// Exactly one commit succeeds; the rest get ConcurrentConflict.
fn racing_writers_exactly_one_wins<S, F>(factory: &F) -> Result<(), String>
where
    S: EngineStorage,
    F: Fn() -> S,
{
    let storage = Arc::new(factory());
    let begun = Arc::new(Barrier::new(N));

    let mut handles = Vec::new();
    for i in 0..N {
        let s = Arc::clone(&storage);
        let begun = Arc::clone(&begun);
        handles.push(thread::spawn(move || -> Result<bool, StorageError> {
            let mut snap = s.begin_snapshot()?;
            // Every thread holds a snapshot before anyone commits.
            begun.wait();
            s.insert(&mut snap, &make_user(&format!("racer-{i}")))?;
            match s.commit_snapshot(snap) {
                Ok(()) => Ok(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .join()
            .map_err(|_| "racer thread panicked".to_string())?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let users: Vec<UserRecord> = storage.fetch_all().map_err(|e| e.to_string())?;
    if users.len() != 1 {
        return Err(format!("expected 1 committed user, got {}", users.len()));
    }
    Ok(())
}
