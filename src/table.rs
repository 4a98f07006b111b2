//! Named tables: a committed keyspace plus a tentative overlay, guarded by
//! one exclusive lock per table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::error::{Result, TkvsError};

/// An owned, scoped holder of a table's exclusive lock.
///
/// All reads and writes of table data go through a guard, so holding the
/// lock is a precondition the compiler checks rather than a convention.
/// Dropping the guard releases the lock; because the guard owns an `Arc` to
/// the table data it is not tied to the lifetime of any particular `Table`
/// handle and can be kept in a session's locks-held set across commands.
pub type TableGuard = ArcMutexGuard<RawMutex, TableData>;

/// The data behind a table's lock: the committed keyspace and the tentative
/// overlay holding pending writes of the current lock holder.
#[derive(Debug, Default)]
pub struct TableData {
    committed: HashMap<String, String>,
    tentative: HashMap<String, String>,
}

impl TableData {
    /// writes `value` under `key` in the tentative overlay
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tentative.insert(key.into(), value.into());
    }

    /// reads the value under `key`, preferring a tentative write over the
    /// committed value
    ///
    /// # Errors
    /// fails with [`TkvsError::Operation`] if the key is present in neither map
    pub fn get(&self, key: &str) -> Result<String> {
        self.tentative
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned()
            .ok_or_else(|| TkvsError::Operation(format!("no such key: {}", key)))
    }

    /// true if `key` has a tentative or committed value
    pub fn has_key(&self, key: &str) -> bool {
        self.tentative.contains_key(key) || self.committed.contains_key(key)
    }

    /// folds every tentative write into the committed keyspace, then clears
    /// the overlay. An empty string is an ordinary value, not a delete.
    pub fn commit_changes(&mut self) {
        for (key, value) in self.tentative.drain() {
            self.committed.insert(key, value);
        }
    }

    /// discards every tentative write
    pub fn rollback_changes(&mut self) {
        self.tentative.clear();
    }
}

/// A handle to one named table.
///
/// Handles are cheap to clone and share the same underlying data; the
/// registry owns the canonical set of handles for the process lifetime.
/// Tables are never renamed or deleted at runtime.
#[derive(Debug, Clone)]
pub struct Table {
    name: Arc<str>,
    data: Arc<Mutex<TableData>>,
}

impl Table {
    /// creates a new, empty table
    pub fn new(name: &str) -> Self {
        Table {
            name: Arc::from(name),
            data: Arc::new(Mutex::new(TableData::default())),
        }
    }

    /// this table's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// acquires the table's exclusive lock, blocking until it is available
    pub fn lock(&self) -> TableGuard {
        Mutex::lock_arc(&self.data)
    }

    /// acquires the table's exclusive lock only if it is free
    pub fn try_lock(&self) -> Option<TableGuard> {
        Mutex::try_lock_arc(&self.data)
    }
}
