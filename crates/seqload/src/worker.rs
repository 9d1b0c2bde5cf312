//! The per-partition generation loop.
//!
//! A [`PartitionWorker`] resolves its checkpoint once, then repeatedly
//! computes the next term, persists it and pauses, until the term's driving
//! quantity passes the ceiling or it is told to stop:
//!
//! ```text
//! Idle -> Resolving -> Computing -> Persisting -> (pause) -> Computing ...
//!                                       \-> Stopped (ceiling exceeded)
//! ```
//!
//! Each term is computed on tokio's blocking pool while the worker keeps
//! watching its cancellation token.
//!
//! Failures are best-effort: a failed computation is retried from the same
//! checkpoint after the pause, a failed write loses that term for good and
//! the loop moves on. Only the ceiling or the cancellation token end a run.

use crate::{
    Checkpoint, CheckpointResolver, Error, PartitionId, SequenceEntry, SequenceGenerator,
    SequenceStore, Step,
};
use core::time::Duration;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last term's driving quantity exceeded the ceiling.
    CeilingReached,
    /// The cancellation token fired.
    Interrupted,
}

/// What one worker did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub partition: PartitionId,
    pub stop_reason: StopReason,
    pub entries_written: u64,
    pub compute_failures: u64,
    pub store_failures: u64,
    /// Last checkpoint reached, whether or not its write succeeded. `None`
    /// if the worker stopped before resolving.
    pub last: Option<Checkpoint>,
}

enum WorkerState {
    Idle,
    Resolving,
    Computing(Checkpoint),
    Persisting(SequenceEntry),
    Stopped(StopReason),
}

impl WorkerState {
    #[cfg(feature = "tracing")]
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Computing(_) => "computing",
            Self::Persisting(_) => "persisting",
            Self::Stopped(_) => "stopped",
        }
    }
}

/// Owns one partition of a sequence for the length of a run.
pub struct PartitionWorker<G> {
    partition: PartitionId,
    generator: G,
    store: Arc<dyn SequenceStore>,
    resolver: CheckpointResolver,
    ceiling: BigUint,
    delay: Duration,
    cancel: CancellationToken,
}

impl<G: SequenceGenerator> PartitionWorker<G> {
    pub fn new(
        partition: PartitionId,
        generator: G,
        store: Arc<dyn SequenceStore>,
        table: &str,
        ceiling: BigUint,
        delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let resolver = CheckpointResolver::new(Arc::clone(&store), table);
        Self {
            partition,
            generator,
            store,
            resolver,
            ceiling,
            delay,
            cancel,
        }
    }

    /// Runs the loop to completion and reports what happened.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(partition = self.partition.get(), sequence = self.generator.name())))]
    pub async fn run(mut self) -> WorkerReport {
        let progress = self.generator.progress();
        let seed = self.generator.seed_checkpoint();

        let mut entries_written = 0;
        let mut compute_failures = 0;
        let mut store_failures = 0;
        let mut last: Option<Checkpoint> = None;

        let mut state = WorkerState::Idle;
        let stop_reason = loop {
            #[cfg(feature = "tracing")]
            tracing::trace!("Partition {} {}", self.partition, state.name());

            state = match state {
                WorkerState::Idle => WorkerState::Resolving,
                WorkerState::Resolving => {
                    match self.resolver.resolve(self.partition, &seed).await {
                        Ok(checkpoint) => {
                            let done = progress.of(&checkpoint) > &self.ceiling;
                            last = Some(checkpoint.clone());
                            if done {
                                WorkerState::Stopped(StopReason::CeilingReached)
                            } else {
                                WorkerState::Computing(checkpoint)
                            }
                        }
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                "Partition {} could not resolve its checkpoint: {_e}",
                                self.partition
                            );
                            self.pause_then(WorkerState::Resolving).await
                        }
                    }
                }
                WorkerState::Computing(previous) => {
                    if self.cancel.is_cancelled() {
                        WorkerState::Stopped(StopReason::Interrupted)
                    } else {
                        match self.compute(progress.of(&previous)).await {
                            None => WorkerState::Stopped(StopReason::Interrupted),
                            Some(Step::Computed(value)) => {
                                WorkerState::Persisting(previous.successor(self.partition, value))
                            }
                            Some(Step::Failed(_e)) => {
                                compute_failures += 1;
                                #[cfg(feature = "tracing")]
                                tracing::warn!(
                                    "Partition {} skipped a term after {previous}: {_e}",
                                    self.partition
                                );
                                self.pause_then(WorkerState::Computing(previous)).await
                            }
                        }
                    }
                }
                WorkerState::Persisting(entry) => {
                    match self.store.put_entry(self.resolver.table(), &entry).await {
                        Ok(()) => entries_written += 1,
                        Err(_e) => {
                            store_failures += 1;
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                "Partition {} lost term at position {}: {_e}",
                                self.partition,
                                entry.position
                            );
                        }
                    }

                    let checkpoint = Checkpoint::from(entry);
                    let done = progress.of(&checkpoint) > &self.ceiling;
                    last = Some(checkpoint.clone());
                    if done {
                        WorkerState::Stopped(StopReason::CeilingReached)
                    } else {
                        self.pause_then(WorkerState::Computing(checkpoint)).await
                    }
                }
                WorkerState::Stopped(reason) => break reason,
            };
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Partition {} stopped ({stop_reason:?}) after {entries_written} writes",
            self.partition
        );

        WorkerReport {
            partition: self.partition,
            stop_reason,
            entries_written,
            compute_failures,
            store_failures,
            last,
        }
    }

    /// Runs one generator step on the blocking pool so a slow term neither
    /// stalls the runtime nor delays cancellation. Returns `None` if the
    /// token fires first; the abandoned step finishes in the background and
    /// its result is dropped.
    async fn compute(&mut self, previous: &BigUint) -> Option<Step> {
        let mut generator = self.generator.clone();
        let previous = previous.clone();
        let task = tokio::task::spawn_blocking(move || {
            let step = generator.next(&previous);
            (generator, step)
        });

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::info!("Partition {} interrupted while computing", self.partition);
                None
            }
            joined = task => match joined {
                Ok((generator, step)) => {
                    self.generator = generator;
                    Some(step)
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Some(Step::Failed(Error::WorkerTask {
                    context: format!("partition {} step: {e}", self.partition),
                })),
            },
        }
    }

    /// Sleeps for the iteration delay, then moves to `next`. A cancellation
    /// during the pause stops the worker instead.
    async fn pause_then(&self, next: WorkerState) -> WorkerState {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::info!("Partition {} interrupted while pausing", self.partition);
                WorkerState::Stopped(StopReason::Interrupted)
            }
            () = sleep(self.delay) => next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FibonacciGenerator, PrimeGenerator, Progress, fib, store::testing::FlakyStore};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;

    const TABLE: &str = "worker-test";
    const DELAY: Duration = Duration::from_millis(100);

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    fn worker<G: SequenceGenerator>(
        store: &Arc<FlakyStore>,
        partition: u32,
        generator: G,
        ceiling: u64,
        cancel: &CancellationToken,
    ) -> PartitionWorker<G> {
        PartitionWorker::new(
            PartitionId(partition),
            generator,
            Arc::clone(store) as Arc<dyn SequenceStore>,
            TABLE,
            big(ceiling),
            DELAY,
            cancel.clone(),
        )
    }

    fn values(store: &FlakyStore, partition: u32) -> Vec<(BigUint, BigUint)> {
        store
            .inner
            .entries(TABLE)
            .unwrap()
            .into_iter()
            .filter(|e| e.partition == PartitionId(partition))
            .map(|e| (e.position, e.value))
            .collect()
    }

    /// Counts up by one, failing every second call.
    #[derive(Clone, Default)]
    struct FlakyCounter {
        calls: u32,
    }

    impl SequenceGenerator for FlakyCounter {
        fn name(&self) -> &'static str {
            "flaky-counter"
        }

        fn seed(&self) -> BigUint {
            BigUint::default()
        }

        fn progress(&self) -> Progress {
            Progress::Value
        }

        fn next(&mut self, previous: &BigUint) -> Step {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Step::Failed(Error::Computation {
                    reason: format!("call {}", self.calls),
                })
            } else {
                Step::Computed(previous + 1u32)
            }
        }
    }

    /// Counts up by one, but each step blocks until the shared gate opens.
    #[derive(Clone, Default)]
    struct Gated {
        gate: Arc<Mutex<()>>,
    }

    impl SequenceGenerator for Gated {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn seed(&self) -> BigUint {
            BigUint::default()
        }

        fn progress(&self) -> Progress {
            Progress::Value
        }

        fn next(&mut self, previous: &BigUint) -> Step {
            let _open = self.gate.lock();
            Step::Computed(previous + 1u32)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prime_worker_stops_after_first_term_above_ceiling() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, PrimeGenerator::new(8), 20, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::CeilingReached);
        assert_eq!(report.entries_written, 9);
        assert_eq!(report.last, Some(Checkpoint::new(9u32, 23u32)));

        let written: Vec<_> = values(&store, 0).into_iter().map(|(_, v)| v).collect();
        let expected: Vec<_> = [2u64, 3, 5, 7, 11, 13, 17, 19, 23]
            .into_iter()
            .map(big)
            .collect();
        assert_eq!(written, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_resumes_from_stored_checkpoint() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        store
            .put_entry(TABLE, &SequenceEntry::new(PartitionId(0), big(5), big(11)))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, PrimeGenerator::new(8), 20, &cancel)
            .run()
            .await;

        assert_eq!(report.entries_written, 4);
        assert_eq!(
            values(&store, 0),
            vec![
                (big(5), big(11)),
                (big(6), big(13)),
                (big(7), big(17)),
                (big(8), big(19)),
                (big(9), big(23)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_past_ceiling_writes_nothing() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        store
            .put_entry(TABLE, &SequenceEntry::new(PartitionId(0), big(10), big(29)))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, PrimeGenerator::new(8), 20, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::CeilingReached);
        assert_eq!(report.entries_written, 0);
        assert_eq!(store.put_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fibonacci_worker_is_driven_by_position() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();

        let report = worker(&store, 1, FibonacciGenerator::new(), 10, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::CeilingReached);
        let written = values(&store, 1);
        assert_eq!(written.len(), 11);
        for (position, value) in &written {
            let n = u64::try_from(position).unwrap();
            assert_eq!(*value, fib(n));
        }
        assert!(written.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(written.last().unwrap().0, big(11));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_lost_not_retried() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        store.fail_every_nth_put.store(3, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, PrimeGenerator::new(8), 20, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::CeilingReached);
        assert_eq!(report.store_failures, 3);
        assert_eq!(report.entries_written, 6);
        assert_eq!(store.put_calls(), 9);
        // Positions 3, 6 and 9 were dropped; the rest kept their slots.
        let positions: Vec<_> = values(&store, 0).into_iter().map(|(p, _)| p).collect();
        assert_eq!(positions, [1u64, 2, 4, 5, 7, 8].map(big).to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_computations_are_retried_from_same_checkpoint() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, FlakyCounter::default(), 4, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::CeilingReached);
        assert_eq!(report.entries_written, 5);
        assert_eq!(report.compute_failures, 4);
        let written: Vec<_> = values(&store, 0).into_iter().map(|(_, v)| v).collect();
        assert_eq!(written, [1u64, 2, 3, 4, 5].map(big).to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_checkpoint_is_retried() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        store
            .put_entry(TABLE, &SequenceEntry::new(PartitionId(0), big(8), big(19)))
            .await
            .unwrap();
        store.failing_queries.store(2, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let report = worker(&store, 0, PrimeGenerator::new(8), 20, &cancel)
            .run()
            .await;

        assert_eq!(store.query_calls(), 3);
        assert_eq!(report.entries_written, 1);
        assert_eq!(report.last, Some(Checkpoint::new(9u32, 23u32)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_pause_stops_promptly() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            worker(&store, 0, PrimeGenerator::new(8), 1_000_000, &cancel).run(),
        );

        sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert!((1..=5).contains(&report.entries_written));
        assert_eq!(report.entries_written, store.put_calls());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_during_slow_step_stops_without_writing() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();
        let generator = Gated::default();
        let closed = generator.gate.lock();

        let handle = tokio::spawn(worker(&store, 0, generator.clone(), 100, &cancel).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker must not wait for the step")
            .unwrap();
        drop(closed);

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.entries_written, 0);
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_writes_nothing() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = worker(&store, 0, PrimeGenerator::new(8), 100, &cancel)
            .run()
            .await;

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.entries_written, 0);
    }
}
