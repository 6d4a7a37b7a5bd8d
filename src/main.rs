use std::path::PathBuf;

use anyhow::Result;
use azru::{config, runtime, simulation, telemetry};
use clap::{Parser, Subcommand};
use config::Config;
use runtime::BatchMode;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "azru", about = "Digital twin of a heated room with predictive heating control.")]
struct Cli {
    /// Path to a TOML config file (defaults to config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Real-time twin with the MPC controller and the control surface (default)
    Run,
    /// Accelerated offline simulation between two dates
    Batch {
        /// First simulated instant, ISO-8601
        #[arg(long, value_parser = parse_time)]
        start: chrono::NaiveDateTime,
        /// Last simulated instant, ISO-8601
        #[arg(long, value_parser = parse_time)]
        end: chrono::NaiveDateTime,
        #[arg(long, value_enum, default_value_t = BatchMode::Manual)]
        mode: BatchMode,
    },
}

fn parse_time(s: &str) -> Result<chrono::NaiveDateTime, String> {
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    simulation::parse_iso_timestamp(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("starting azru twin");
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                telemetry::shutdown_signal().await;
                trigger.cancel();
            });
            let report = runtime::run_twin(cfg, cancel).await?;
            info!(
                ticks = report.ticks,
                total_cost_eur = report.total_cost,
                "twin stopped"
            );
        }
        Commands::Batch { start, end, mode } => {
            let report = runtime::run_batch(&cfg, start, end, mode).await?;
            info!(
                ticks = report.ticks,
                total_cost_eur = report.total_cost,
                final_temperature_c = report.final_state.t_air_c,
                started = %report.started,
                ended = %report.ended,
                "batch complete"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    warn!("shutdown complete");
    Ok(())
}
