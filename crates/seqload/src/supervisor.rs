use crate::{
    Error, Result, RunOutcome, RunReport, SequenceConfig, SequenceGenerator, SequenceStore,
    WorkerPool,
};
use core::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Where a [`ResetSupervisor`] is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Populate,
    CoolDown1,
    Rebuild,
    CoolDown2,
}

impl SupervisorPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Populate => "populate",
            Self::CoolDown1 => "cool-down-1",
            Self::Rebuild => "rebuild",
            Self::CoolDown2 => "cool-down-2",
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// All four phases ran.
    Completed,
    /// Cancellation arrived during populate or a cool-down.
    Abandoned,
}

/// Hook for recording cycle milestones, e.g. into metrics.
pub trait CycleObserver: Send + Sync {
    fn populated(&self, _report: &RunReport) {}
    fn rebuilt(&self, _table: &str) {}
}

struct NoopObserver;

impl CycleObserver for NoopObserver {}

/// Drives one sequence through `Populate -> CoolDown1 -> Rebuild ->
/// CoolDown2` forever.
///
/// Phases are strictly serialized: the pool drains every worker before
/// populate returns, so a rebuild never overlaps a write to the table it
/// drops.
pub struct ResetSupervisor<G> {
    store: Arc<dyn SequenceStore>,
    pool: WorkerPool<G>,
    config: SequenceConfig,
    observer: Arc<dyn CycleObserver>,
}

impl<G: SequenceGenerator> ResetSupervisor<G> {
    pub fn new(store: Arc<dyn SequenceStore>, generator: G, config: SequenceConfig) -> Self {
        let pool = WorkerPool::new(Arc::clone(&store), generator, &config);
        Self {
            store,
            pool,
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub const fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Cycles until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rebuild`] when a rebuild fails. The table may then be
    /// missing, so the cycle is not retried in-process.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(sequence = self.pool.sequence(), table = %self.config.table)))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut _cycles: u64 = 0;
        while !cancel.is_cancelled() {
            match self.run_cycle(cancel).await? {
                CycleOutcome::Completed => _cycles += 1,
                CycleOutcome::Abandoned => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Supervisor stopped after {_cycles} complete cycles");
        Ok(())
    }

    /// Runs one full cycle, or as much of it as cancellation allows.
    ///
    /// An interrupted populate skips the rebuild. A timed-out one has already
    /// been drained by the pool and is rebuilt like a completed one.
    ///
    /// # Errors
    ///
    /// See [`ResetSupervisor::run`].
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        self.enter(SupervisorPhase::Populate);
        let report = self
            .pool
            .run(self.config.partitions, &self.config.ceiling, cancel)
            .await?;
        self.observer.populated(&report);
        if report.outcome == RunOutcome::Interrupted {
            return Ok(CycleOutcome::Abandoned);
        }

        self.enter(SupervisorPhase::CoolDown1);
        if !self.cool_down(cancel).await {
            return Ok(CycleOutcome::Abandoned);
        }

        // Not cancellable: stopping between delete and create would leave
        // the table missing.
        self.enter(SupervisorPhase::Rebuild);
        self.rebuild().await?;
        self.observer.rebuilt(&self.config.table);

        self.enter(SupervisorPhase::CoolDown2);
        if !self.cool_down(cancel).await {
            return Ok(CycleOutcome::Abandoned);
        }

        Ok(CycleOutcome::Completed)
    }

    /// Drops the table and recreates it empty with the same schema and
    /// throughput.
    ///
    /// # Errors
    ///
    /// Any store failure, wrapped in [`Error::Rebuild`].
    pub async fn rebuild(&self) -> Result<()> {
        let table = self.config.table.as_str();
        let wrap = |e| Error::rebuild(table, e);

        let schema = self.store.describe_schema(table).await.map_err(wrap)?;
        self.store.delete_table(table).await.map_err(wrap)?;
        self.store.await_table_absent(table).await.map_err(wrap)?;
        self.store
            .create_table(table, &schema)
            .await
            .map_err(wrap)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Rebuilt {table} with {:?}", schema.throughput);
        Ok(())
    }

    /// Returns `false` if cancelled before the cool-down elapsed.
    async fn cool_down(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::info!("Cool-down on {} interrupted", self.config.table);
                false
            }
            () = sleep(self.config.cool_down) => true,
        }
    }

    #[allow(clippy::unused_self)]
    fn enter(&self, _phase: SupervisorPhase) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "{} on {} entering {_phase}",
            self.pool.sequence(),
            self.config.table
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FibonacciGenerator, PartitionId, SequenceEntry,
        store::testing::{FlakyStore, test_schema},
    };
    use core::time::Duration;
    use num_bigint::BigUint;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;

    const TABLE: &str = "supervisor-test";

    #[derive(Default)]
    struct Recorder {
        populated: Mutex<Vec<RunOutcome>>,
        rebuilt: Mutex<Vec<String>>,
    }

    impl CycleObserver for Recorder {
        fn populated(&self, report: &RunReport) {
            self.populated.lock().push(report.outcome);
        }

        fn rebuilt(&self, table: &str) {
            self.rebuilt.lock().push(table.to_string());
        }
    }

    fn config(ceiling: u64) -> SequenceConfig {
        SequenceConfig::new(TABLE, 2, BigUint::from(ceiling))
            .unwrap()
            .with_iteration_delay(Duration::from_millis(100))
            .with_cool_down(Duration::from_secs(1))
    }

    fn supervisor(
        store: &Arc<FlakyStore>,
        config: SequenceConfig,
        recorder: &Arc<Recorder>,
    ) -> ResetSupervisor<FibonacciGenerator> {
        ResetSupervisor::new(
            Arc::clone(store) as Arc<dyn SequenceStore>,
            FibonacciGenerator::new(),
            config,
        )
        .with_observer(Arc::clone(recorder) as Arc<dyn CycleObserver>)
    }

    #[tokio::test]
    async fn rebuild_empties_table_and_keeps_schema() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        for p in 0..3 {
            store
                .put_entry(
                    TABLE,
                    &SequenceEntry::new(PartitionId(p), BigUint::from(1u32), BigUint::from(1u32)),
                )
                .await
                .unwrap();
        }

        let sup = supervisor(&store, config(5), &Arc::default());
        sup.rebuild().await.unwrap();

        assert_eq!(store.inner.generation(TABLE), Some(2));
        for p in 0..3 {
            assert!(store.query(TABLE, PartitionId(p)).await.unwrap().is_empty());
        }
        assert_eq!(store.describe_schema(TABLE).await.unwrap(), test_schema());
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_repopulate_fresh_generations() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let recorder = Arc::new(Recorder::default());
        let sup = supervisor(&store, config(5), &recorder);
        let cancel = CancellationToken::new();

        // Populate ends at 0.5s, rebuild at 1.5s, second populate ends at
        // 3.0s, leaving the cancel inside the second CoolDown1.
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });
        sup.run(&cancel).await.unwrap();

        assert_eq!(store.inner.generation(TABLE), Some(2));
        assert_eq!(
            *recorder.populated.lock(),
            vec![RunOutcome::Completed, RunOutcome::Completed]
        );
        assert_eq!(*recorder.rebuilt.lock(), vec![TABLE.to_string()]);
        // Only the second generation's entries survive.
        let entries = store.inner.entries(TABLE).unwrap();
        assert_eq!(entries.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_populate_skips_rebuild() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let recorder = Arc::new(Recorder::default());
        let sup = supervisor(&store, config(1_000_000), &recorder);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        assert_eq!(
            sup.run_cycle(&cancel).await.unwrap(),
            CycleOutcome::Abandoned
        );
        assert_eq!(store.inner.generation(TABLE), Some(1));
        assert!(!store.inner.entries(TABLE).unwrap().is_empty());
        assert!(recorder.rebuilt.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_populate_is_still_rebuilt() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let recorder = Arc::new(Recorder::default());
        let config = config(1_000_000).with_max_run_duration(Duration::from_millis(300));
        let sup = supervisor(&store, config, &recorder);

        let outcome = sup.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Completed);
        assert_eq!(*recorder.populated.lock(), vec![RunOutcome::TimedOut]);
        assert_eq!(store.inner.generation(TABLE), Some(2));
        assert!(store.inner.entries(TABLE).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rebuild_propagates() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        store.fail_create.store(true, Ordering::SeqCst);
        let sup = supervisor(&store, config(3), &Arc::default());

        let err = sup.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(&err, Error::Rebuild { table, .. } if table == TABLE));
        assert!(!store.inner.contains_table(TABLE));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_cool_down_returns_ok() {
        let store = Arc::new(FlakyStore::with_table(TABLE));
        let recorder = Arc::new(Recorder::default());
        let sup = supervisor(&store, config(2), &recorder);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(800)).await;
            trigger.cancel();
        });

        sup.run(&cancel).await.unwrap();
        assert_eq!(*recorder.populated.lock(), vec![RunOutcome::Completed]);
        assert!(recorder.rebuilt.lock().is_empty());
        assert_eq!(store.inner.generation(TABLE), Some(1));
    }
}
