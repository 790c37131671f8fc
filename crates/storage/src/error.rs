/// All errors that can be returned by an EngineStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: another snapshot was committed after
    /// this one began.
    #[error("concurrent conflict: snapshot taken at generation {expected_generation}, store is at {actual_generation}")]
    ConcurrentConflict {
        expected_generation: u64,
        actual_generation: u64,
    },

    /// No record with the given key exists in the table.
    #[error("record not found: {table}/{key}")]
    NotFound { table: String, key: String },

    /// A record with this key already exists in the table.
    #[error("record already exists: {table}/{key}")]
    AlreadyExists { table: String, key: String },

    /// A record could not be converted to or from its stored form.
    #[error("serialization error in {table}: {message}")]
    Serialization { table: String, message: String },

    /// A backend-specific storage error (lock poisoning, I/O, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
