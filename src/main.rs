use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use flashflood_service::alert::thresholds::ImpactLookup;
use flashflood_service::config::{LedgerBackend, PipelineConfig};
use flashflood_service::db::PostgresLedgerStore;
use flashflood_service::ingest::bundle::RunBundle;
use flashflood_service::ledger::{JsonFileLedgerStore, LedgerStore};
use flashflood_service::logging::{self, LogLevel, Stage};
use flashflood_service::pipeline::{FloodPipeline, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "flashflood_service", about = "Flash-flood early-warning decision run")]
struct Cli {
    /// TOML configuration; falls back to FLASHFLOOD_CONFIG, then the built-in registry.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "info", env = "FLASHFLOOD_LOG_LEVEL")]
    log_level: LogLevel,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline over a JSON run bundle and print the outcome.
    Run {
        #[arg(long)]
        bundle: PathBuf,
        /// Run time (RFC 3339); defaults to the current time.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Validate the configuration and exit.
    CheckConfig,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init_logger(cli.log_level, cli.log_file.as_deref(), cli.json_logs);

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::from_env().context("loading configuration")?,
    };

    match cli.command {
        Command::CheckConfig => {
            println!(
                "configuration ok: {} region(s), {} mapped area(s), {} district order(s)",
                config.regions.len(),
                config.upstream.len(),
                config.severity_orders.len()
            );
            for line in config.region_summaries() {
                println!("  {}", line);
            }
            Ok(())
        }
        Command::Run { bundle, now } => {
            let now = now.unwrap_or_else(Utc::now);
            let bundle = RunBundle::load(&bundle)
                .with_context(|| format!("loading run bundle {}", bundle.display()))?;
            let impact = bundle.impact_table();
            logging::info(
                Stage::System,
                None,
                &format!("run at {} with {} impact record(s)", now, impact.len()),
            );

            let outcome = match config.ledger.backend {
                LedgerBackend::File => {
                    let store = JsonFileLedgerStore::new(&config.ledger.path);
                    run_with_store(&config, &bundle, &impact, store, now)?
                }
                LedgerBackend::Postgres => {
                    let store = PostgresLedgerStore::from_env(&config.ledger.table)
                        .context("connecting to the ledger database")?;
                    run_with_store(&config, &bundle, &impact, store, now)?
                }
            };

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}

fn run_with_store<S: LedgerStore>(
    config: &PipelineConfig,
    bundle: &RunBundle,
    impact: &dyn ImpactLookup,
    store: S,
    now: DateTime<Utc>,
) -> Result<RunOutcome> {
    let mut pipeline = FloodPipeline::new(config, impact, store);
    let outcome = pipeline
        .run_from_sources(bundle, &bundle.archive, &bundle.gauges, &bundle.water_levels, now)
        .context("pipeline run failed")?;
    Ok(outcome)
}
