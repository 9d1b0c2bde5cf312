//! # Telemetry
//!
//! Logs always go to stdout through `tracing_subscriber::fmt`, filtered by
//! `RUST_LOG` (default `info`). With `LOG_FILE` set, the same events are
//! appended to that file without ANSI colors.
//!
//! The `metrics` feature adds an OpenTelemetry meter provider with a stdout
//! exporter. Cycle milestones reach it through [`MetricsObserver`]; without
//! the feature every recording helper is a no-op.
//!
//! ```bash
//! RUST_LOG=seqload=debug,info cargo run --features metrics
//! ```

use anyhow::Context;
use seqload::{CycleObserver, RunReport};
use std::{fs::OpenOptions, path::Path, sync::Mutex};
use tracing_subscriber::{
    EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending exports. Call once, right before exiting.
    pub fn shutdown(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry(log_file: Option<&Path>) -> anyhow::Result<TelemetryProviders> {
    let file_layer = log_file
        .map(|path| -> anyhow::Result<_> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Ok(tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_target(false)
                .with_timer(ChronoLocal::rfc_3339())
                .with_writer(Mutex::new(file)))
        })
        .transpose()?;

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .with(file_layer);

    #[cfg(feature = "metrics")]
    let meter_provider = {
        let provider = init_metrics();
        opentelemetry::global::set_meter_provider(provider.clone());
        let scope = InstrumentationScope::builder("seqload")
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
        provider
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let resource = Resource::builder()
        .with_service_name("seqload-server")
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();
    let reader = sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
        .with_interval(std::time::Duration::from_secs(5))
        .build();

    sdkmetrics::SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build()
}

#[cfg(feature = "metrics")]
static ENTRIES_WRITTEN: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static COMPUTE_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STORE_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POPULATE_RUNS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POPULATE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REBUILDS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = ENTRIES_WRITTEN.set(
        meter
            .u64_counter("entries_written")
            .with_description("Sequence entries persisted")
            .build(),
    );

    let _ = COMPUTE_FAILURES.set(
        meter
            .u64_counter("compute_failures")
            .with_description("Iterations skipped because a term could not be computed")
            .build(),
    );

    let _ = STORE_FAILURES.set(
        meter
            .u64_counter("store_failures")
            .with_description("Terms lost to a failed write")
            .build(),
    );

    let _ = POPULATE_RUNS.set(
        meter
            .u64_counter("populate_runs")
            .with_description("Populate runs by outcome")
            .build(),
    );

    let _ = POPULATE_DURATION_MS.set(
        meter
            .f64_histogram("populate_duration")
            .with_unit("ms")
            .with_description("Wall time of a populate run")
            .build(),
    );

    let _ = REBUILDS.set(
        meter
            .u64_counter("rebuilds")
            .with_description("Completed table rebuilds")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn record_populate(report: &RunReport) {
    let attrs = [
        KeyValue::new("sequence", report.sequence),
        KeyValue::new("table", report.table.clone()),
    ];
    if let Some(counter) = ENTRIES_WRITTEN.get() {
        counter.add(report.entries_written(), &attrs);
    }
    if let Some(counter) = COMPUTE_FAILURES.get() {
        counter.add(report.compute_failures(), &attrs);
    }
    if let Some(counter) = STORE_FAILURES.get() {
        counter.add(report.store_failures(), &attrs);
    }
    if let Some(histogram) = POPULATE_DURATION_MS.get() {
        histogram.record(report.elapsed.as_secs_f64() * 1000.0, &attrs);
    }
    if let Some(counter) = POPULATE_RUNS.get() {
        let outcome = match report.outcome {
            seqload::RunOutcome::Completed => "completed",
            seqload::RunOutcome::Interrupted => "interrupted",
            seqload::RunOutcome::TimedOut => "timed_out",
        };
        let [sequence, table] = attrs;
        counter.add(1, &[sequence, table, KeyValue::new("outcome", outcome)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_populate(_report: &RunReport) {}

#[cfg(feature = "metrics")]
pub fn increment_rebuilds(table: &str) {
    if let Some(counter) = REBUILDS.get() {
        counter.add(1, &[KeyValue::new("table", table.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rebuilds(_table: &str) {}

/// Forwards supervisor milestones to the recording helpers above.
pub struct MetricsObserver;

impl CycleObserver for MetricsObserver {
    fn populated(&self, report: &RunReport) {
        record_populate(report);
    }

    fn rebuilt(&self, table: &str) {
        increment_rebuilds(table);
    }
}
