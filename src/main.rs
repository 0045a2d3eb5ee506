use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use port_sentry_rs::collector::NetstatCollector;
use port_sentry_rs::config::Config;
use port_sentry_rs::scheduler::{ScanOutcome, Scheduler};
use port_sentry_rs::server::{self, AppState};
use port_sentry_rs::store::AlertStore;

/// port-sentry-rs — passive host port monitor with a small HTTP API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-sentry-rs",
    version,
    about = "Passive host port monitor: scans listening sockets, diffs changes, raises risk-ranked alerts.",
    long_about = None
)]
struct Cli {
    /// Address to serve the HTTP API on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// SQLite database path for persisted alerts.
    #[arg(long, default_value = "port-sentry.db")]
    db: PathBuf,

    /// Optional JSON config file (intervals, risk port sets, ignore list).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single scan cycle, print a JSON report, and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let store = Arc::new(AlertStore::open(
        &cli.db,
        config.max_retries,
        config.retry_delay(),
    )?);
    let collector = Arc::new(NetstatCollector::new());
    let scheduler = Scheduler::new(collector, store.clone(), &config)?;

    if cli.once {
        let sched = scheduler.clone();
        let outcome = tokio::task::spawn_blocking(move || sched.scan_once()).await??;
        match outcome {
            ScanOutcome::Completed(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            ScanOutcome::Conflict => {
                eprintln!("scan already in progress");
            }
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let scan_loop = tokio::spawn(scheduler.clone().run(cancel.clone()));

    let state = AppState { scheduler, store };
    tokio::select! {
        res = server::serve(&cli.bind, state) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            cancel.cancel();
        }
    }

    let _ = scan_loop.await;
    Ok(())
}
