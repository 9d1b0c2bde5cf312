//! Runs one [`PartitionWorker`] per partition and waits for all of them.
//!
//! The pool never returns while a worker it spawned is still running: on
//! interruption or timeout it cancels the workers and drains them first.
//! That is what lets the supervisor drop the table right after a run without
//! racing in-flight writes.

use crate::{
    Error, PartitionId, PartitionWorker, Result, SequenceConfig, SequenceGenerator, SequenceStore,
    WorkerReport, config::validate_partitions,
};
use core::time::Duration;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::{
    task::JoinError,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;

/// How a populate run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every partition reached the ceiling (or died trying).
    Completed,
    /// The caller's cancellation token fired while waiting.
    Interrupted,
    /// The run outlived `max_run_duration` and was stopped.
    TimedOut,
}

/// Aggregate of one populate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub sequence: &'static str,
    pub table: String,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    /// One report per worker that returned, ordered by partition.
    pub workers: Vec<WorkerReport>,
    /// Workers that panicked instead of returning a report.
    pub failed_workers: usize,
}

impl RunReport {
    pub fn entries_written(&self) -> u64 {
        self.workers.iter().map(|w| w.entries_written).sum()
    }

    pub fn compute_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.compute_failures).sum()
    }

    pub fn store_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.store_failures).sum()
    }
}

/// Spawns and supervises the partitioned workers of a single sequence.
pub struct WorkerPool<G> {
    store: Arc<dyn SequenceStore>,
    generator: G,
    table: String,
    iteration_delay: Duration,
    max_run_duration: Duration,
}

impl<G: SequenceGenerator> WorkerPool<G> {
    /// Each worker gets its own clone of `generator`.
    pub fn new(store: Arc<dyn SequenceStore>, generator: G, config: &SequenceConfig) -> Self {
        Self {
            store,
            generator,
            table: config.table.clone(),
            iteration_delay: config.iteration_delay,
            max_run_duration: config.max_run_duration,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sequence(&self) -> &'static str {
        self.generator.name()
    }

    /// Runs partitions `0..partition_count` until each one passes `ceiling`.
    ///
    /// Cancelling `cancel` stops the workers and still returns `Ok` with
    /// [`RunOutcome::Interrupted`].
    ///
    /// # Errors
    ///
    /// Only [`Error::InvalidConfig`] for an unusable partition count.
    pub async fn run(
        &self,
        partition_count: usize,
        ceiling: &BigUint,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        validate_partitions(partition_count)?;
        let start = Instant::now();
        let workers_token = cancel.child_token();

        let handles: Vec<_> = (0..partition_count)
            .map(|i| {
                // Fits: validate_partitions checked the count against u32.
                let partition = PartitionId(i as u32);
                let worker = PartitionWorker::new(
                    partition,
                    self.generator.clone(),
                    Arc::clone(&self.store),
                    &self.table,
                    ceiling.clone(),
                    self.iteration_delay,
                    workers_token.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Started {partition_count} {} workers on {} (ceiling {ceiling})",
            self.sequence(),
            self.table
        );

        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);

        // Workers share the caller's token, so they can all finish in the
        // same poll that observes the cancellation.
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => RunOutcome::Interrupted,
            results = &mut joined => {
                let outcome = if cancel.is_cancelled() {
                    RunOutcome::Interrupted
                } else {
                    RunOutcome::Completed
                };
                return Ok(self.report(outcome, start, results));
            }
            () = sleep(self.max_run_duration) => RunOutcome::TimedOut,
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Stopping {} workers on {} ({outcome:?})",
            self.sequence(),
            self.table
        );
        workers_token.cancel();
        let results = joined.await;
        Ok(self.report(outcome, start, results))
    }

    fn report(
        &self,
        outcome: RunOutcome,
        start: Instant,
        results: Vec<core::result::Result<WorkerReport, JoinError>>,
    ) -> RunReport {
        let mut workers = Vec::with_capacity(results.len());
        let mut failed_workers = 0;
        for res in results {
            match res {
                Ok(report) => workers.push(report),
                Err(_e) => {
                    failed_workers += 1;
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "{}",
                        Error::WorkerTask {
                            context: format!("{} worker on {}: {_e}", self.sequence(), self.table),
                        }
                    );
                }
            }
        }

        let report = RunReport {
            sequence: self.sequence(),
            table: self.table.clone(),
            outcome,
            elapsed: start.elapsed(),
            workers,
            failed_workers,
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            "{} run on {} finished ({:?}) in {:?}: {} written, {} compute failures, {} store failures",
            report.sequence,
            report.table,
            report.outcome,
            report.elapsed,
            report.entries_written(),
            report.compute_failures(),
            report.store_failures()
        );

        report
    }
}
