use clap::Parser;
use dbbench::{
    config::{BenchConfig, ConfigErrors},
    database::BackendRegistry,
    orchestrator::BenchmarkOrchestrator,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Benchmark CRUD and index performance across database backends
#[derive(Parser, Debug)]
#[command(name = "dbbench", version)]
struct Args {
    /// YAML configuration describing the dataset and the databases to benchmark
    #[arg(long, short = 'c', default_value = "config.yaml")]
    config: PathBuf,

    /// Benchmark every configured database (default)
    #[arg(long, conflicts_with = "only")]
    all: bool,

    /// Only benchmark the named database, can be repeated
    #[arg(long, value_name = "NAME")]
    only: Vec<String>,

    /// Write the JSON results here instead of `output.json_results`
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "Benchmark run failed: {error}");

            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), ConfigErrors> {
    let mut config = BenchConfig::load(&args.config)?;

    if args.all || args.only.is_empty() {
        info!(databases = config.databases.len(), "Benchmarking every configured database");
    } else {
        config.retain_databases(&args.only)?;
    }

    if let Some(output) = args.output {
        config.output.json_results = output;
    }
    let output = config.output.json_results.clone();

    let orchestrator = BenchmarkOrchestrator::new(config, BackendRegistry::with_defaults())?;
    let report = orchestrator.run_all()?;

    report.write_json(&output)?;
    report.log_summary();

    Ok(())
}
