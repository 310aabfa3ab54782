//! Maintenance sweeper: removes expired tokens and idempotency records.
//!
//! Runs as a background Tokio task, ticking at the configured interval,
//! until the shutdown watch channel flips to `true` or closes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::idempotency::IdempotencyGuard;
use crate::tokens::ExecutionTokenService;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Expired, never-used, never-revoked tokens deleted.
    pub tokens_removed: u64,
    /// Expired idempotency records deleted.
    pub idempotency_records_removed: u64,
}

/// Run one sweep. Each store is swept independently; a failure in one is
/// logged and reported as zero removals.
pub async fn sweep_once(tokens: &ExecutionTokenService, dedupe: &IdempotencyGuard) -> SweepReport {
    let tokens_removed = match tokens.cleanup_expired_tokens().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "token sweep failed");
            0
        }
    };
    let idempotency_records_removed = match dedupe.cleanup().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "idempotency sweep failed");
            0
        }
    };
    SweepReport {
        tokens_removed,
        idempotency_records_removed,
    }
}

/// Run the sweeper loop until shutdown.
///
/// The first sweep happens one full interval after start.
pub async fn run_sweeper(
    tokens: Arc<ExecutionTokenService>,
    dedupe: IdempotencyGuard,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_secs = period.as_secs(), "sweeper started");

    let mut interval = tokio::time::interval(period);
    // Skip the first immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = sweep_once(&tokens, &dedupe).await;
                if report != SweepReport::default() {
                    info!(
                        tokens_removed = report.tokens_removed,
                        idempotency_records_removed = report.idempotency_records_removed,
                        "sweep completed"
                    );
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("sweeper shutting down");
                    break;
                }
            }
        }
    }

    info!("sweeper stopped");
}

/// Spawn [`run_sweeper`] on the current runtime.
pub fn spawn_sweeper(
    tokens: Arc<ExecutionTokenService>,
    dedupe: IdempotencyGuard,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_sweeper(tokens, dedupe, period, shutdown_rx))
}
