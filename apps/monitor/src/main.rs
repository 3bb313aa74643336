use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::Monitor;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use config::{load_settings, Settings};
use terminal::TerminalSink;

/// Watches a PHD2 guiding server and logs its status cards.
#[derive(Parser, Debug)]
#[command(name = "phd-monitor")]
struct Args {
    /// Settings file; defaults to ./monitor.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Binding tables replacing the built-in catalog and cards.
    #[arg(long)]
    tables: Option<PathBuf>,
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.host {
            settings.host = v;
        }
        if let Some(v) = self.port {
            settings.port = v;
        }
        if let Some(v) = self.tables {
            settings.tables_path = Some(v);
        }
        if let Some(v) = self.reconnect_delay_ms {
            settings.reconnect_delay_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    args.apply(&mut settings);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let tables = settings.load_tables()?;
    let config = settings.to_monitor_config();
    info!(
        endpoint = %config.connection.endpoint,
        cards = tables.cards.len(),
        "monitoring guiding server"
    );

    let monitor = Monitor::start(config, &tables, Arc::new(TerminalSink::new()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let stats = monitor.stats();
    info!(
        events = stats.events_routed,
        updates = stats.updates_emitted,
        parse_failures = stats.parse_failures,
        unknown = stats.unknown_dropped,
        misses = stats.correlation_misses,
        "shutting down"
    );
    monitor.shutdown().await;
    Ok(())
}
