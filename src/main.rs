//! rls-bench: run a filtered ANN benchmark and write the JSON report.
//!
//! Usage:
//!   rls-bench --config bench.json --output report.json
//!   rls-bench --queries 200 --mode concurrent --workers 8
//!   rls-bench --exhaustive --repartition-to 8,16
//!   rls-bench --sweep-ef 16,32,64,128,256
//!
//! Exit codes: 0 success, 2 configuration error, 3 runtime error,
//! 4 partial result (some queries failed or timed out).

use clap::{Parser, ValueEnum};
use rls_ann_bench::{
    BenchConfig, BenchError, BenchmarkDriver, ExecutionMode, ExitStatus, SearchMode,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Sequential,
    Concurrent,
}

#[derive(Parser)]
#[command(name = "rls-bench")]
#[command(about = "Benchmark RLS-filtered ANN search over dynamically partitioned indexes")]
struct Cli {
    /// JSON configuration file (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the JSON report (stdout if absent)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of queries per phase
    #[arg(long)]
    queries: Option<usize>,

    /// Query scheduling
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Worker threads for concurrent mode (0 = all cores)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Exact scan instead of ANN indexes
    #[arg(long)]
    exhaustive: bool,

    /// Partition counts of additional phases, e.g. 8,16
    #[arg(long, value_delimiter = ',')]
    repartition_to: Vec<usize>,

    /// ef_search values to sweep, e.g. 16,32,64
    #[arg(long, value_delimiter = ',')]
    sweep_ef: Vec<usize>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("rls_ann_bench=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let status = match run(cli) {
        Ok(status) => status,
        Err(err) => {
            tracing::error!(error = %err, "benchmark failed");
            ExitStatus::from_error(&err)
        }
    };
    process::exit(status.code());
}

fn load_config(cli: &Cli) -> Result<BenchConfig, BenchError> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::load(path).map_err(|e| match e {
            BenchError::Io(io) => BenchError::config(format!("{}: {}", path.display(), io)),
            other => other,
        })?,
        None => BenchConfig::default(),
    };

    if let Some(queries) = cli.queries {
        config = config.with_queries(queries);
    }
    match cli.mode {
        Some(Mode::Sequential) => config = config.with_execution(ExecutionMode::Sequential),
        Some(Mode::Concurrent) => {
            config = config.with_execution(ExecutionMode::Concurrent {
                workers: cli.workers,
            })
        }
        None => {}
    }
    if cli.exhaustive {
        config = config.with_search_mode(SearchMode::Exhaustive);
    }
    if !cli.repartition_to.is_empty() {
        config = config.with_repartition_to(cli.repartition_to.clone());
    }
    if !cli.sweep_ef.is_empty() {
        config = config.with_ef_sweep(cli.sweep_ef.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitStatus, BenchError> {
    let config = load_config(&cli)?;
    tracing::info!(
        records = config.dataset.records,
        queries = config.workload.queries,
        strategy = %config.partitioning,
        "starting benchmark"
    );

    let driver = BenchmarkDriver::new(config)?;
    let report = driver.run();

    match &cli.output {
        Some(path) => {
            report.write_to(path)?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => println!("{}", report.to_json()?),
    }

    let status = report.exit_status();
    if let Some(reason) = &report.halted {
        tracing::error!(reason = %reason, "run halted");
    }
    Ok(status)
}
