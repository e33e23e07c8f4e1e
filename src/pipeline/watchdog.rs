//! Stall watchdog: recovers steps whose worker crashed or hung mid-stage.
//!
//! Runs on a fixed period, decoupled from any document's lifecycle. A step
//! force-failed here may still have a live-but-slow worker behind it; that
//! worker's late completion hits the ledger's no-op rule and is logged.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::repository::{DieselError, StepLedger};

/// Periodic recovery of stalled processing steps.
pub struct StallWatchdog {
    ledger: StepLedger,
    /// How long a step may stay `in_progress` before it is presumed dead.
    timeout: Duration,
    /// Interval between passes.
    period: Duration,
}

impl StallWatchdog {
    pub fn new(ledger: StepLedger, timeout: Duration, period: Duration) -> Self {
        Self {
            ledger,
            timeout,
            period,
        }
    }

    /// Run a single recovery pass. Returns the number of steps force-failed.
    pub async fn pass(&self) -> Result<usize, DieselError> {
        let recovered = self.ledger.fail_stalled(self.timeout).await?;
        if recovered > 0 {
            info!(recovered, timeout_secs = self.timeout.as_secs(), "recovered stalled steps");
        } else {
            debug!("no stalled steps");
        }
        Ok(recovered)
    }

    /// Run recovery passes until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DieselError> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.pass().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
