//! RustShark Sync CLI
//!
//! Connects to a capture engine and logs every surfaced update.
//!
//! Run with: cargo run -- --url http://127.0.0.1:3000

use clap::Parser;
use rustshark_sync::{
    callback, generate_default_config, Config, LoggingConfig, PullFailure, Snapshot,
    StatsSnapshot, StatusSnapshot, SyncClient,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rustshark-sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time state sync client for the RustShark capture engine")]
struct Cli {
    /// Config file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture engine base URL, e.g. http://127.0.0.1:3000
    #[arg(long)]
    url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(url) = cli.url {
        config.engine.base_url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    init_tracing(&config.logging);

    tracing::info!("RustShark sync client v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        push = %config.engine.ws_url(),
        pull = %config.engine.base_url,
        "Capture engine endpoints"
    );

    let client = SyncClient::from_config(&config)?;

    let on_stats = callback(|s: &Snapshot<StatsSnapshot>| {
        tracing::info!(
            source = %s.source,
            total_packets = s.value.total_packets,
            total_bytes = s.value.total_bytes,
            packet_rate = s.value.packet_rate,
            errors = s.value.errors,
            "Stats"
        );
    });
    let on_status = callback(|s: &Snapshot<StatusSnapshot>| {
        tracing::info!(
            source = %s.source,
            running = s.value.running,
            packet_count = s.value.packet_count,
            "Status"
        );
    });
    let on_live = callback(|live: &bool| {
        tracing::info!(live = *live, "Push connection liveness");
    });
    let on_pull_error = callback(|failure: &PullFailure| {
        tracing::warn!(kind = %failure.kind, error = %failure.error, "Pull failed");
    });

    client.on_stats().add(&on_stats);
    client.on_status().add(&on_status);
    client.on_live_change().add(&on_live);
    client.on_pull_error().add(&on_pull_error);

    client.connect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    client.disconnect();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rustshark_sync={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
