//! In-memory `EngineStorage` backend.
//!
//! Tables hold records in their JSON form, keyed by the record key. A
//! snapshot is a private copy of all tables plus the generation it was taken
//! at; committing swaps the copy in and bumps the generation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::record::Record;
use crate::traits::EngineStorage;

type Table = BTreeMap<String, serde_json::Value>;
type Tables = BTreeMap<&'static str, Table>;

#[derive(Debug, Default)]
struct Committed {
    generation: u64,
    tables: Tables,
}

/// Process-local storage. Nothing survives the value being dropped.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    committed: Mutex<Committed>,
}

/// An open transaction against [`InMemoryStorage`].
#[derive(Debug)]
pub struct MemorySnapshot {
    base_generation: u64,
    tables: Tables,
    dirty: bool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits that changed data so far.
    pub fn generation(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.generation)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Committed>, StorageError> {
        self.committed
            .lock()
            .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".to_string()))
    }
}

fn encode<R: Record>(record: &R) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(record).map_err(|e| StorageError::Serialization {
        table: R::TABLE.to_string(),
        message: e.to_string(),
    })
}

fn decode<R: Record>(value: &serde_json::Value) -> Result<R, StorageError> {
    R::deserialize(value).map_err(|e| StorageError::Serialization {
        table: R::TABLE.to_string(),
        message: e.to_string(),
    })
}

fn read_one<R: Record>(tables: &Tables, key: &str) -> Result<Option<R>, StorageError> {
    tables
        .get(R::TABLE)
        .and_then(|t| t.get(key))
        .map(decode)
        .transpose()
}

fn read_all<R: Record>(tables: &Tables) -> Result<Vec<R>, StorageError> {
    match tables.get(R::TABLE) {
        Some(table) => table.values().map(decode).collect(),
        None => Ok(Vec::new()),
    }
}

impl EngineStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let committed = self.lock()?;
        Ok(MemorySnapshot {
            base_generation: committed.generation,
            tables: committed.tables.clone(),
            dirty: false,
        })
    }

    fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        if !snapshot.dirty {
            return Ok(());
        }
        let mut committed = self.lock()?;
        if committed.generation != snapshot.base_generation {
            return Err(StorageError::ConcurrentConflict {
                expected_generation: snapshot.base_generation,
                actual_generation: committed.generation,
            });
        }
        committed.tables = snapshot.tables;
        committed.generation += 1;
        Ok(())
    }

    fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    fn insert<R: Record>(
        &self,
        snapshot: &mut MemorySnapshot,
        record: &R,
    ) -> Result<(), StorageError> {
        let key = record.key();
        let value = encode(record)?;
        let table = snapshot.tables.entry(R::TABLE).or_default();
        if table.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                table: R::TABLE.to_string(),
                key,
            });
        }
        table.insert(key, value);
        snapshot.dirty = true;
        Ok(())
    }

    fn update<R: Record>(
        &self,
        snapshot: &mut MemorySnapshot,
        record: &R,
    ) -> Result<(), StorageError> {
        let key = record.key();
        let value = encode(record)?;
        match snapshot
            .tables
            .get_mut(R::TABLE)
            .and_then(|t| t.get_mut(&key))
        {
            Some(slot) => {
                *slot = value;
                snapshot.dirty = true;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                table: R::TABLE.to_string(),
                key,
            }),
        }
    }

    fn delete<R: Record>(&self, snapshot: &mut MemorySnapshot, key: &str) -> Result<(), StorageError> {
        match snapshot
            .tables
            .get_mut(R::TABLE)
            .and_then(|t| t.remove(key))
        {
            Some(_) => {
                snapshot.dirty = true;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                table: R::TABLE.to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn get<R: Record>(&self, snapshot: &MemorySnapshot, key: &str) -> Result<Option<R>, StorageError> {
        read_one(&snapshot.tables, key)
    }

    fn scan<R: Record>(&self, snapshot: &MemorySnapshot) -> Result<Vec<R>, StorageError> {
        read_all(&snapshot.tables)
    }

    fn fetch<R: Record>(&self, key: &str) -> Result<Option<R>, StorageError> {
        read_one(&self.lock()?.tables, key)
    }

    fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StorageError> {
        read_all(&self.lock()?.tables)
    }
}
