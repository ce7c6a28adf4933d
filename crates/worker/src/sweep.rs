//! Orphaned checkout sweep job

use std::sync::Arc;
use std::time::{Duration, Instant};

use sitecraft_billing::{BillingService, SweepReport};
use tracing::{debug, error};

/// Run one sweep. Errors are logged, never propagated, so the schedule keeps ticking.
pub async fn run_sweep(billing: &Arc<BillingService>, window: Duration) -> Option<SweepReport> {
    let started = Instant::now();

    match billing.sweeper.sweep(window).await {
        Ok(report) => {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Sweep job done");
            Some(report)
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Orphan sweep failed");
            None
        }
    }
}
