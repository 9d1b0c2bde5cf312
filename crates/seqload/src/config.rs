use crate::{Error, Result};
use core::time::Duration;
use num_bigint::BigUint;

/// Pause between two iterations of a worker.
pub const DEFAULT_ITERATION_DELAY: Duration = Duration::from_millis(100);
/// Idle time before and after each rebuild.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(2 * 60);
/// Upper bound on a single populate run. Not expected to trigger.
pub const DEFAULT_MAX_RUN_DURATION: Duration = Duration::from_secs(100 * 60 * 60);

/// Settings for one sequence: where it is stored, how many partitions
/// generate it, and when a run stops.
///
/// Passed into the pool and supervisor at construction; nothing in this crate
/// reads process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    pub table: String,
    pub partitions: usize,
    pub ceiling: BigUint,
    pub iteration_delay: Duration,
    pub cool_down: Duration,
    pub max_run_duration: Duration,
}

impl SequenceConfig {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `table` is blank or `partitions`
    /// is zero or does not fit a [`crate::PartitionId`].
    pub fn new(table: impl Into<String>, partitions: usize, ceiling: BigUint) -> Result<Self> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(Error::InvalidConfig {
                reason: "table name must not be empty".to_string(),
            });
        }
        validate_partitions(partitions)?;

        Ok(Self {
            table,
            partitions,
            ceiling,
            iteration_delay: DEFAULT_ITERATION_DELAY,
            cool_down: DEFAULT_COOL_DOWN,
            max_run_duration: DEFAULT_MAX_RUN_DURATION,
        })
    }

    #[must_use]
    pub const fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    #[must_use]
    pub const fn with_max_run_duration(mut self, max: Duration) -> Self {
        self.max_run_duration = max;
        self
    }
}

pub(crate) fn validate_partitions(partitions: usize) -> Result<()> {
    if partitions == 0 {
        return Err(Error::InvalidConfig {
            reason: "partition count must be greater than 0".to_string(),
        });
    }
    if u32::try_from(partitions).is_err() {
        return Err(Error::InvalidConfig {
            reason: format!("partition count {partitions} exceeds the partition id space"),
        });
    }
    Ok(())
}
