use crate::{Error, PartitionId, Result, SequenceEntry, SequenceStore, TableSchema};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    generation: u64,
    entries: Vec<SequenceEntry>,
}

/// An in-process [`SequenceStore`].
///
/// Tables live in a single mutex-guarded map; every call holds the lock only
/// for the duration of a copy, so workers never wait on each other for long.
/// Deletion is immediate, which makes
/// [`SequenceStore::await_table_absent`] a plain existence check.
///
/// Each successful `create_table` bumps a per-name generation counter so
/// callers can observe that a rebuild really happened.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    generations: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with one empty table already created.
    pub fn with_table(table: &str, schema: TableSchema) -> Self {
        let store = Self::new();
        store.create(table, schema);
        store
    }

    /// Current generation of `table`, or `None` if it does not exist.
    pub fn generation(&self, table: &str) -> Option<u64> {
        self.tables.lock().get(table).map(|t| t.generation)
    }

    /// Snapshot of every entry in `table`, in write order.
    pub fn entries(&self, table: &str) -> Option<Vec<SequenceEntry>> {
        self.tables.lock().get(table).map(|t| t.entries.clone())
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }

    fn create(&self, table: &str, schema: TableSchema) -> bool {
        let mut tables = self.tables.lock();
        if tables.contains_key(table) {
            return false;
        }
        let generation = {
            let mut generations = self.generations.lock();
            let counter = generations.entry(table.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        tables.insert(
            table.to_string(),
            MemoryTable {
                schema,
                generation,
                entries: Vec::new(),
            },
        );
        true
    }
}

fn not_found(table: &str) -> Error {
    Error::TableNotFound {
        table: table.to_string(),
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn put_entry(&self, table: &str, entry: &SequenceEntry) -> Result<()> {
        let mut tables = self.tables.lock();
        let t = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        t.entries.push(entry.clone());
        Ok(())
    }

    async fn query(&self, table: &str, partition: PartitionId) -> Result<Vec<SequenceEntry>> {
        let tables = self.tables.lock();
        let t = tables.get(table).ok_or_else(|| not_found(table))?;
        Ok(t.entries
            .iter()
            .filter(|e| e.partition == partition)
            .cloned()
            .collect())
    }

    async fn describe_schema(&self, table: &str) -> Result<TableSchema> {
        let tables = self.tables.lock();
        tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| not_found(table))
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.tables
            .lock()
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| not_found(table))
    }

    async fn await_table_absent(&self, table: &str) -> Result<()> {
        if self.contains_table(table) {
            return Err(Error::DeleteTimeout {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        if self.create(table, schema.clone()) {
            Ok(())
        } else {
            Err(Error::store(table, "table already exists"))
        }
    }
}
