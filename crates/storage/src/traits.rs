use crate::error::StorageError;
use crate::record::Record;

/// The storage trait for procflow engine backends.
///
/// An `EngineStorage` implementation provides transactional storage for every
/// record the engine keeps: identities, grants, deployments, instances,
/// tasks, variables, attachments and event subscriptions.
///
/// ## Snapshot Semantics
///
/// All reads and writes made by an engine command go through a
/// `Self::Snapshot`, a type representing an in-progress transaction. The
/// lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call `insert`/`update`/`delete`/`get`/`scan` with the snapshot
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// Reads through a snapshot see that snapshot's own writes. Writes are not
/// visible to `fetch`/`fetch_all` or to other snapshots until committed. A
/// dropped snapshot is rolled back.
///
/// ## Conflict Detection
///
/// Committing a snapshot that wrote anything fails with
/// `StorageError::ConcurrentConflict` when another snapshot was committed
/// after it began. Read-only snapshots always commit.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a single engine can be
/// shared across threads.
pub trait EngineStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations visible.
    fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Mutations (within snapshot) ───────────────────────────────────────────

    /// Insert a new record.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if the key is taken.
    fn insert<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        record: &R,
    ) -> Result<(), StorageError>;

    /// Replace an existing record.
    ///
    /// Returns `Err(StorageError::NotFound)` if no record has this key.
    fn update<R: Record>(
        &self,
        snapshot: &mut Self::Snapshot,
        record: &R,
    ) -> Result<(), StorageError>;

    /// Delete a record by key.
    ///
    /// Returns `Err(StorageError::NotFound)` if no record has this key.
    fn delete<R: Record>(&self, snapshot: &mut Self::Snapshot, key: &str)
        -> Result<(), StorageError>;

    // ── Reads (within snapshot) ───────────────────────────────────────────────

    /// Read one record by key, including the snapshot's uncommitted writes.
    fn get<R: Record>(&self, snapshot: &Self::Snapshot, key: &str)
        -> Result<Option<R>, StorageError>;

    /// Read every record of a table in key order.
    fn scan<R: Record>(&self, snapshot: &Self::Snapshot) -> Result<Vec<R>, StorageError>;

    // ── Reads (committed state, outside snapshot) ─────────────────────────────

    /// Read one committed record by key.
    fn fetch<R: Record>(&self, key: &str) -> Result<Option<R>, StorageError>;

    /// Read every committed record of a table in key order.
    fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StorageError>;
}
