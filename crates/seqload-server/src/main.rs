#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use seqload::{
    DynamoStore, FibonacciGenerator, MemoryStore, PrimeGenerator, ResetSupervisor,
    SequenceGenerator, SequenceStore, TableSchema, Throughput,
};
use server::config::{CliArgs, ServerConfig, StoreKind};
use server::telemetry::{MetricsObserver, init_telemetry};
use std::sync::Arc;
use tokio::{signal, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_file.as_deref())?;
    log_startup_info(&config);

    let store = build_store(&config).await?;
    let cancel = CancellationToken::new();
    let observer = Arc::new(MetricsObserver);

    let prime = spawn_supervisor(
        ResetSupervisor::new(
            Arc::clone(&store),
            PrimeGenerator::new(config.prime_confidence),
            config.prime.clone(),
        )
        .with_observer(observer.clone()),
        &cancel,
    );
    let fibonacci = spawn_supervisor(
        ResetSupervisor::new(
            Arc::clone(&store),
            FibonacciGenerator::new(),
            config.fibonacci.clone(),
        )
        .with_observer(observer),
        &cancel,
    );
    let signal = tokio::spawn(shutdown_signal(cancel.clone(), config.uptime_limit));

    let (prime, fibonacci) = tokio::join!(prime, fibonacci);
    signal.abort();

    let res = flatten(prime).and(flatten(fibonacci));
    match &res {
        Ok(()) => tracing::info!("Supervisors stopped, shutting down"),
        Err(e) => tracing::error!("Exiting after supervisor failure: {e:#}"),
    }
    providers.shutdown();
    res
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting seqload with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting seqload on {:?}: {} x {} prime, {} x {} fibonacci",
            config.store,
            config.prime.partitions,
            config.prime.table,
            config.fibonacci.partitions,
            config.fibonacci.table
        );
    }
}

async fn build_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn SequenceStore>> {
    match config.store {
        StoreKind::Memory => {
            let store = MemoryStore::new();
            let schema = TableSchema::partitioned_sequence(Throughput::OnDemand);
            for table in [&config.prime.table, &config.fibonacci.table] {
                store.create_table(table, &schema).await?;
            }
            Ok(Arc::new(store))
        }
        StoreKind::Dynamodb => Ok(Arc::new(
            DynamoStore::from_env()
                .await
                .with_delete_timeout(config.delete_timeout),
        )),
    }
}

/// A failed supervisor cancels `cancel` so its sibling stops too.
fn spawn_supervisor<G: SequenceGenerator>(
    supervisor: ResetSupervisor<G>,
    cancel: &CancellationToken,
) -> JoinHandle<seqload::Result<()>> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let res = supervisor.run(&cancel).await;
        if let Err(e) = &res {
            tracing::error!(
                "Supervisor for {} failed: {e}",
                supervisor.config().table
            );
            cancel.cancel();
        }
        res
    })
}

fn flatten(joined: Result<seqload::Result<()>, tokio::task::JoinError>) -> anyhow::Result<()> {
    Ok(joined??)
}

async fn shutdown_signal(cancel: CancellationToken, uptime_limit: Duration) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = sleep(uptime_limit) => tracing::info!("Uptime limit of {uptime_limit:?} reached"),
        () = cancel.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, stopping supervisors...");
    cancel.cancel();
}
