//! Fault-injecting store used by the worker, pool and supervisor tests.

use crate::{
    Error, MemoryStore, PartitionId, Result, SequenceEntry, SequenceStore, TableSchema, Throughput,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub(crate) fn test_schema() -> TableSchema {
    TableSchema::partitioned_sequence(Throughput::Provisioned {
        read_units: 10,
        write_units: 5,
    })
}

/// Wraps a [`MemoryStore`] and fails selected calls.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    /// Every n-th `put_entry` (1-based) fails. Zero disables.
    pub fail_every_nth_put: AtomicU64,
    /// Number of upcoming `query` calls that fail.
    pub failing_queries: AtomicU64,
    pub fail_create: AtomicBool,
    puts: AtomicU64,
    queries: AtomicU64,
}

impl FlakyStore {
    pub fn with_table(table: &str) -> Self {
        Self {
            inner: MemoryStore::with_table(table, test_schema()),
            ..Self::default()
        }
    }

    pub fn put_calls(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceStore for FlakyStore {
    async fn put_entry(&self, table: &str, entry: &SequenceEntry) -> Result<()> {
        let call = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        let nth = self.fail_every_nth_put.load(Ordering::SeqCst);
        if nth != 0 && call % nth == 0 {
            return Err(Error::store(table, format!("injected write failure #{call}")));
        }
        self.inner.put_entry(table, entry).await
    }

    async fn query(&self, table: &str, partition: PartitionId) -> Result<Vec<SequenceEntry>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::store(table, "injected query failure"));
        }
        self.inner.query(table, partition).await
    }

    async fn describe_schema(&self, table: &str) -> Result<TableSchema> {
        self.inner.describe_schema(table).await
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.inner.delete_table(table).await
    }

    async fn await_table_absent(&self, table: &str) -> Result<()> {
        self.inner.await_table_absent(table).await
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::store(table, "injected create failure"));
        }
        self.inner.create_table(table, schema).await
    }
}
