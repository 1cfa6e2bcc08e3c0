//! tcdatalogger: Fetch configured API endpoints and load them into the warehouse
//!
//! Usage:
//!   # Run every configured endpoint once
//!   tcdatalogger run --config-dir ./config --warehouse-dir ./warehouse
//!
//!   # Run selected endpoints with debug logging
//!   tcdatalogger run --endpoint v2_faction_crimes --log-level debug
//!
//!   # List configured endpoints
//!   tcdatalogger endpoints

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tcdatalogger::config::{format_duration, load_dotenv, AppConfig};
use tcdatalogger::{EndpointReport, EndpointRunner, HttpFetcher, JsonlWarehouse, RunnerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tcdatalogger")]
#[command(about = "Load Torn API endpoints into warehouse tables", long_about = None)]
struct Cli {
    /// Directory holding TC_API_config.json and TC_API_key.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `tcdatalogger=debug` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run endpoints once, concurrently
    Run {
        /// Endpoint to run; repeat for several (default: all)
        #[arg(long = "endpoint", value_name = "NAME")]
        endpoints: Vec<String>,

        /// Root directory of the JSON-Lines warehouse
        #[arg(long, env = "TC_WAREHOUSE_DIR", default_value = "./warehouse")]
        warehouse_dir: PathBuf,

        /// Maximum endpoints in flight at once
        #[arg(long, default_value_t = 8)]
        max_concurrent: usize,

        /// Timeout for a single HTTP request, in seconds
        #[arg(long, default_value_t = 60)]
        request_timeout: u64,
    },

    /// List configured endpoints
    Endpoints,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    load_dotenv()?;
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = AppConfig::load(cli.config_dir.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            endpoints,
            warehouse_dir,
            max_concurrent,
            request_timeout,
        } => {
            let specs = config.select(&endpoints)?;
            let fetcher = HttpFetcher::new(
                config.api_keys.clone(),
                Duration::from_secs(request_timeout),
            )?;
            let warehouse = JsonlWarehouse::open(&warehouse_dir)
                .await
                .with_context(|| format!("Failed to open warehouse at {}", warehouse_dir.display()))?;

            let runner = EndpointRunner::new(
                RunnerConfig { max_concurrent },
                Arc::new(fetcher),
                Arc::new(warehouse),
            );
            let reports = runner.run_all(specs).await;

            for report in &reports {
                println!("{}", summary_line(report));
            }
            let failed = reports.iter().filter(|r| !r.is_success()).count();
            if failed > 0 {
                eprintln!("{failed} of {} endpoints failed", reports.len());
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Endpoints => {
            for spec in &config.endpoints {
                println!(
                    "{:<32} {:<48} {:<8} every {}",
                    spec.name,
                    spec.table.to_string(),
                    spec.storage_mode.as_str(),
                    format_duration(spec.frequency)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn summary_line(report: &EndpointReport) -> String {
    let elapsed = format!("{:.1}s", report.duration.as_secs_f64());
    match &report.outcome {
        Ok(results) => format!(
            "ok    {:<32} tables={} rows={} {}",
            report.endpoint,
            results.len(),
            report.rows_written(),
            elapsed
        ),
        Err(err) => format!(
            "FAIL  {:<32} {}: {} {}",
            report.endpoint,
            err.kind(),
            err,
            elapsed
        ),
    }
}
