use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TkvsError};
use crate::message::is_identifier;
use crate::table::Table;

/// The process-wide mapping from table name to [`Table`], behind its own
/// mutex.
///
/// The registry mutex is held only for the duration of a lookup or an
/// insert and never while acquiring a table's lock; callers look up a
/// handle, let the registry lock go, and then act on the table. Handles
/// are cheap to clone, so every session thread gets its own copy of the
/// registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

impl Registry {
    /// creates an empty registry
    pub fn new() -> Self {
        Registry::default()
    }

    /// creates a new, empty table under `name`
    ///
    /// # Errors
    /// fails with [`TkvsError::Operation`] if `name` is not an identifier or
    /// a table with that name already exists
    pub fn create_table(&self, name: &str) -> Result<()> {
        if !is_identifier(name) {
            return Err(TkvsError::Operation(format!(
                "invalid table name: {}",
                name
            )));
        }

        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(TkvsError::Operation(format!(
                "table already exists: {}",
                name
            )));
        }
        tables.insert(name.to_string(), Table::new(name));
        debug!(table = name, "created table");
        Ok(())
    }

    /// looks up a table by name, returning a handle that stays valid for
    /// the process lifetime
    pub fn find_table(&self, name: &str) -> Option<Table> {
        self.tables.lock().get(name).cloned()
    }
}
