//! CLI entry point for the Metro-North relay.
//!
//! Every command builds the engine from flags and environment, brings the
//! datasets it needs up to date, and prints its result as JSON on stdout.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use mnr_relay::config::{DEFAULT_REALTIME_URL, DEFAULT_STATIC_URL, EngineConfig};
use mnr_relay::engine::RelayEngine;
use mnr_relay::output::print_json;
use mnr_relay::query::{AlertFilter, TrainFilter, VehicleFilter, parse_time_of_day};
use mnr_relay::scheduler::{RefreshScheduler, SchedulerOptions};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const MAX_TRAIN_LIMIT: usize = 100;

#[derive(Parser)]
#[command(name = "mnr_relay")]
#[command(about = "Real-time relay for Metro-North Railroad GTFS feeds", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Directory holding the static archive and download state
    #[arg(long, env = "MNR_DATA_DIR", default_value = "gtfs/metro-north-railroad", global = true)]
    data_dir: PathBuf,

    /// API key sent as the x-api-key header
    #[arg(long, env = "MNR_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// GTFS-realtime feed URL
    #[arg(long, env = "MNR_REALTIME_URL", default_value = DEFAULT_REALTIME_URL, global = true)]
    realtime_url: String,

    /// Static GTFS archive URL
    #[arg(long, env = "MNR_STATIC_URL", default_value = DEFAULT_STATIC_URL, global = true)]
    static_url: String,

    /// Timezone for time-of-day filters when the archive has no agency.txt
    #[arg(long, env = "MNR_TIMEZONE", default_value = "America/New_York", global = true)]
    timezone: String,

    /// Minimum hours between static archive downloads
    #[arg(long, env = "MNR_STATIC_MIN_INTERVAL_HOURS", default_value_t = 24, global = true)]
    static_min_interval_hours: u64,

    /// Seconds between realtime refreshes in `run`
    #[arg(
        long,
        env = "MNR_REALTIME_INTERVAL_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    realtime_interval_secs: u64,
}

impl ConfigArgs {
    fn into_config(self) -> Result<EngineConfig> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| anyhow!("invalid timezone {:?}: {e}", self.timezone))?;

        let mut config = EngineConfig::default()
            .with_data_dir(self.data_dir)
            .with_api_key(self.api_key)
            .with_timezone(timezone)
            .with_static_min_interval(Duration::from_secs(self.static_min_interval_hours * 3600))
            .with_realtime_interval(Duration::from_secs(self.realtime_interval_secs));
        config.realtime_url = self.realtime_url;
        config.static_url = self.static_url;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List trains, earliest arrival first
    Trains {
        /// Station the train is at, heading to, or calls at
        #[arg(long)]
        origin: Option<String>,

        /// Station the train terminates at
        #[arg(long)]
        destination: Option<String>,

        /// Route id
        #[arg(long)]
        route: Option<String>,

        /// Earliest local arrival time (HH:MM)
        #[arg(long, value_name = "HH:MM")]
        from: Option<String>,

        /// Latest local arrival time (HH:MM)
        #[arg(long, value_name = "HH:MM")]
        to: Option<String>,

        /// Maximum number of trains (at most 100)
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one train by trip id
    Train {
        #[arg(value_name = "TRIP_ID")]
        trip_id: String,
    },
    /// List stations
    Stations,
    /// List routes
    Routes,
    /// List vehicle positions
    Vehicles {
        #[arg(long)]
        route: Option<String>,

        #[arg(long)]
        trip: Option<String>,
    },
    /// List service alerts
    Alerts {
        #[arg(long)]
        route: Option<String>,

        #[arg(long)]
        stop: Option<String>,
    },
    /// Download the static archive if the rate limit allows
    UpdateStatic {
        /// Download even inside the minimum interval
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Show refresh status of both datasets
    Status,
    /// Refresh both datasets in the background until Ctrl-C
    Run {
        /// CSV file to append realtime refresh statistics to
        #[arg(long)]
        stats_csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/mnr_relay.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("mnr_relay.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = cli.config.into_config()?;
    let engine = RelayEngine::from_config(config)
        .await
        .context("failed to build HTTP sources")?;

    match cli.command {
        Commands::Trains {
            origin,
            destination,
            route,
            from,
            to,
            limit,
        } => {
            let filter = TrainFilter {
                origin_station: origin,
                destination_station: destination,
                route,
                limit: Some(limit.min(MAX_TRAIN_LIMIT)),
                ..TrainFilter::default()
            };
            let filter = match from.as_deref().map(parse_time_of_day).transpose()? {
                Some(t) => filter.from_time(t),
                None => filter,
            };
            let filter = match to.as_deref().map(parse_time_of_day).transpose()? {
                Some(t) => filter.to_time(t),
                None => filter,
            };

            prepare(&engine, true).await;
            print_json(&engine.query_trains(&filter))?;
        }
        Commands::Train { trip_id } => {
            prepare(&engine, true).await;
            print_json(&engine.query_train_by_trip_id(&trip_id)?)?;
        }
        Commands::Stations => {
            prepare(&engine, false).await;
            print_json(&engine.query_stations())?;
        }
        Commands::Routes => {
            prepare(&engine, false).await;
            print_json(&engine.query_routes())?;
        }
        Commands::Vehicles { route, trip } => {
            prepare(&engine, true).await;
            print_json(&engine.query_vehicle_positions(&VehicleFilter { route, trip }))?;
        }
        Commands::Alerts { route, stop } => {
            prepare(&engine, true).await;
            print_json(&engine.query_alerts(&AlertFilter { route, stop }))?;
        }
        Commands::UpdateStatic { force } => {
            load_from_disk(&engine).await;
            let outcome = engine.refresh_static_now(force).await?;
            print_json(&outcome)?;
        }
        Commands::Status => {
            load_from_disk(&engine).await;
            print_json(&engine.status())?;
        }
        Commands::Run { stats_csv } => {
            load_from_disk(&engine).await;
            let engine = Arc::new(engine);
            let options = SchedulerOptions::from_engine(&engine).with_stats_path(stats_csv);
            let scheduler = RefreshScheduler::start(engine, options);

            info!("Relay running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            info!("Shutting down");
            scheduler.shutdown().await;
        }
    }

    Ok(())
}

/// Loads the archive on disk, refreshes the static schedule if due, and
/// fetches the realtime feed when `realtime` is set. Failures are logged;
/// queries then report the missing dataset themselves.
async fn prepare(engine: &RelayEngine, realtime: bool) {
    load_from_disk(engine).await;
    let _ = engine.refresh_static_now(false).await;
    if realtime {
        let _ = engine.refresh_realtime_now().await;
    }
}

async fn load_from_disk(engine: &RelayEngine) {
    match engine.load_static_from_disk().await {
        Ok(Some(generation)) => info!(generation, "Loaded static archive from disk"),
        Ok(None) => info!("No static archive on disk yet"),
        Err(e) => warn!(error = %e, "Ignoring unreadable static archive"),
    }
}
