use crate::{Checkpoint, PartitionId, Result, SequenceStore};
use std::sync::Arc;

/// Derives where a partition should resume from the durable table.
///
/// Resolution is scoped to a single partition: two partitions never see each
/// other's entries, so running them side by side cannot make either one skip
/// or repeat work because of the other.
#[derive(Clone)]
pub struct CheckpointResolver {
    store: Arc<dyn SequenceStore>,
    table: String,
}

impl CheckpointResolver {
    pub fn new(store: Arc<dyn SequenceStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the highest checkpoint recorded for `partition`, or `seed` if
    /// the partition has no entries in the current table generation.
    ///
    /// # Errors
    ///
    /// Propagates the store's query failure. Callers decide whether to retry;
    /// falling back to `seed` on a failed read would rewrite the partition
    /// from the start.
    pub async fn resolve(&self, partition: PartitionId, seed: &Checkpoint) -> Result<Checkpoint> {
        let entries = self.store.query(&self.table, partition).await?;
        let latest = entries
            .into_iter()
            .map(Checkpoint::from)
            .max()
            .unwrap_or_else(|| seed.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Partition {partition} of {} resolved to {latest}",
            self.table
        );

        Ok(latest)
    }
}
