//! Expiry sweeper.
//!
//! Periodically moves Granted requests whose window has elapsed to Expired.
//! Expire is idempotent and atomic per request, so any number of sweepers
//! may run against the same store.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use consent_kernel_core::TransitionOutcome;
use consent_kernel_store::{Store, StoreExt};

use crate::config::SweeperConfig;
use crate::error::{ErrorKind, Result};
use crate::kernel::ConsentKernel;

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due requests picked up by this sweep.
    pub examined: usize,
    /// Requests moved to Expired.
    pub expired: usize,
    /// Requests another writer settled first.
    pub skipped: usize,
    /// Requests that failed; retried on the next sweep.
    pub failed: usize,
}

/// Drives [`ConsentKernel::expire`] over every due request.
pub struct ExpirySweeper<S: Store> {
    kernel: Arc<ConsentKernel<S>>,
    config: SweeperConfig,
}

impl<S: Store> ExpirySweeper<S> {
    /// Create a sweeper using the kernel's sweeper configuration.
    pub fn new(kernel: Arc<ConsentKernel<S>>) -> Self {
        let config = kernel.config().sweeper.clone();
        Self { kernel, config }
    }

    pub fn with_config(kernel: Arc<ConsentKernel<S>>, config: SweeperConfig) -> Self {
        Self { kernel, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Run one sweep.
    ///
    /// Only a failure to enumerate due requests is an error. Per-request
    /// failures are logged and counted.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.kernel.now();
        let mut due = self.kernel.store().due_for_expiry(now).await?;
        if let Some(limit) = self.config.batch_limit {
            due.truncate(limit);
        }

        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };
        for record in due {
            match self.kernel.expire_outcome(&record.request_id).await {
                Ok(TransitionOutcome::Applied { .. }) => report.expired += 1,
                Ok(TransitionOutcome::Unchanged(_)) => report.skipped += 1,
                // Revoked or re-read as not yet due between listing and writing.
                Err(e) if e.kind() == ErrorKind::InvalidTransition => {
                    debug!(request_id = %record.request_id, error = %e, "expire skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(request_id = %record.request_id, error = %e, "expire failed");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "sweep complete"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.interval.as_millis() as u64, "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("sweeper stopped");
    }
}
