use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use seqload::{BigUint, SequenceConfig};
use std::path::PathBuf;

/// Backing store for both sequence tables.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-process tables, created at startup. Nothing survives a restart.
    Memory,
    /// Amazon DynamoDB. Both tables must already exist.
    Dynamodb,
}

/// Runtime configuration for the `seqload-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// defaults reproduce the long-running profile: one prime partition up to
/// one billion, two Fibonacci partitions up to position one hundred, and a
/// two-minute pause on each side of a rebuild.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqload-server",
    version,
    about = "Writes prime and Fibonacci sequences into periodically rebuilt tables"
)]
pub struct CliArgs {
    /// Where the sequence tables live.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// Table receiving prime entries.
    ///
    /// Environment variable: `PRIME_TABLE`
    #[arg(long, env = "PRIME_TABLE", default_value_t = String::from("prime-table"))]
    pub prime_table: String,

    /// Number of concurrent prime partitions.
    ///
    /// Environment variable: `PRIME_PARTITIONS`
    #[arg(long, env = "PRIME_PARTITIONS", default_value_t = 1)]
    pub prime_partitions: usize,

    /// A prime worker stops after writing the first prime above this value.
    ///
    /// Environment variable: `PRIME_CEILING`
    #[arg(long, env = "PRIME_CEILING", default_value = "1000000000")]
    pub prime_ceiling: BigUint,

    /// Miller-Rabin rounds per candidate.
    ///
    /// Environment variable: `PRIME_CONFIDENCE`
    #[arg(long, env = "PRIME_CONFIDENCE", default_value_t = seqload::DEFAULT_PRIME_CONFIDENCE)]
    pub prime_confidence: u32,

    /// Table receiving Fibonacci entries.
    ///
    /// Environment variable: `FIBONACCI_TABLE`
    #[arg(long, env = "FIBONACCI_TABLE", default_value_t = String::from("fibonacci-table"))]
    pub fibonacci_table: String,

    /// Number of concurrent Fibonacci partitions.
    ///
    /// Environment variable: `FIBONACCI_PARTITIONS`
    #[arg(long, env = "FIBONACCI_PARTITIONS", default_value_t = 2)]
    pub fibonacci_partitions: usize,

    /// A Fibonacci worker stops once its position exceeds this value.
    ///
    /// Environment variable: `FIBONACCI_CEILING`
    #[arg(long, env = "FIBONACCI_CEILING", default_value = "100")]
    pub fibonacci_ceiling: BigUint,

    /// Pause between two iterations of a worker, in milliseconds.
    ///
    /// Environment variable: `ITERATION_DELAY_MS`
    #[arg(long, env = "ITERATION_DELAY_MS", default_value_t = 100)]
    pub iteration_delay_ms: u64,

    /// Idle time before and after each rebuild, in seconds.
    ///
    /// Environment variable: `COOL_DOWN_SECS`
    #[arg(long, env = "COOL_DOWN_SECS", default_value_t = 120)]
    pub cool_down_secs: u64,

    /// Upper bound on a single populate run, in seconds.
    ///
    /// Environment variable: `MAX_RUN_SECS`
    #[arg(long, env = "MAX_RUN_SECS", default_value_t = 360_000)]
    pub max_run_secs: u64,

    /// How long a rebuild waits for the dropped table to disappear, in
    /// seconds. Only used by the DynamoDB store.
    ///
    /// Environment variable: `TABLE_DELETE_TIMEOUT_SECS`
    #[arg(long, env = "TABLE_DELETE_TIMEOUT_SECS", default_value_t = 300)]
    pub table_delete_timeout_secs: u64,

    /// Graceful shutdown after this many seconds of uptime.
    ///
    /// Environment variable: `UPTIME_LIMIT_SECS`
    #[arg(long, env = "UPTIME_LIMIT_SECS", default_value_t = 8_640_000)]
    pub uptime_limit_secs: u64,

    /// Append log output to this file in addition to stdout.
    ///
    /// Environment variable: `LOG_FILE`
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub store: StoreKind,
    pub prime: SequenceConfig,
    pub prime_confidence: u32,
    pub fibonacci: SequenceConfig,
    pub delete_timeout: Duration,
    pub uptime_limit: Duration,
    pub log_file: Option<PathBuf>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.prime_confidence == 0 {
            bail!("PRIME_CONFIDENCE must be greater than 0");
        }

        // Each supervisor drops its own table; sharing one would rebuild it
        // under the other's workers.
        if args.prime_table == args.fibonacci_table {
            bail!(
                "PRIME_TABLE and FIBONACCI_TABLE must differ (both are {:?})",
                args.prime_table
            );
        }

        if args.uptime_limit_secs == 0 {
            bail!("UPTIME_LIMIT_SECS must be greater than 0");
        }

        let iteration_delay = Duration::from_millis(args.iteration_delay_ms);
        let cool_down = Duration::from_secs(args.cool_down_secs);
        let max_run_duration = Duration::from_secs(args.max_run_secs);

        let prime = SequenceConfig::new(args.prime_table, args.prime_partitions, args.prime_ceiling)?
            .with_iteration_delay(iteration_delay)
            .with_cool_down(cool_down)
            .with_max_run_duration(max_run_duration);
        let fibonacci = SequenceConfig::new(
            args.fibonacci_table,
            args.fibonacci_partitions,
            args.fibonacci_ceiling,
        )?
        .with_iteration_delay(iteration_delay)
        .with_cool_down(cool_down)
        .with_max_run_duration(max_run_duration);

        Ok(Self {
            store: args.store,
            prime,
            prime_confidence: args.prime_confidence,
            fibonacci,
            delete_timeout: Duration::from_secs(args.table_delete_timeout_secs),
            uptime_limit: Duration::from_secs(args.uptime_limit_secs),
            log_file: args.log_file,
        })
    }
}
