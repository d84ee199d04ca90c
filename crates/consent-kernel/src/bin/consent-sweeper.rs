//! Runs the expiry sweeper against a SQLite consent database.
//!
//! Environment:
//! - `CONSENT_DB_PATH`: database file (default `consent.db`)
//! - `CONSENT_SWEEP_INTERVAL_SECS`: seconds between sweeps (default 60)
//! - `RUST_LOG`: log filter (default `info`)
//!
//! Pass `--once` to run a single sweep and exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use consent_kernel::store::SqliteStore;
use consent_kernel::{ConsentKernel, ExpirySweeper, KernelConfig, SweeperConfig};

const DEFAULT_DB_PATH: &str = "consent.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut once = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => once = true,
            other => bail!("unknown argument: {other}"),
        }
    }

    let db_path = std::env::var("CONSENT_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into());
    let mut sweeper_config = SweeperConfig::default();
    if let Ok(secs) = std::env::var("CONSENT_SWEEP_INTERVAL_SECS") {
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("CONSENT_SWEEP_INTERVAL_SECS is not a number: {secs}"))?;
        if secs == 0 {
            bail!("CONSENT_SWEEP_INTERVAL_SECS must be positive");
        }
        sweeper_config.interval = Duration::from_secs(secs);
    }

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open consent database at {db_path}"))?;
    let config = KernelConfig {
        sweeper: sweeper_config,
        ..KernelConfig::default()
    };
    let kernel = Arc::new(ConsentKernel::new(store, config));
    let sweeper = ExpirySweeper::new(kernel);

    if once {
        let report = sweeper.sweep_once().await.context("sweep failed")?;
        info!(
            examined = report.examined,
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "single sweep done"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    task.await.context("sweeper task panicked")?;
    Ok(())
}
