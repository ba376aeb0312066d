//! Background task that releases expired claims.

use scirocco_queue::QueueEngine;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the lease reaper.
///
/// Runs indefinitely, returning claimed messages whose lease has run out to
/// `pending`. Returns immediately when the engine has no lease timeout.
pub async fn start_lease_reaper(engine: Arc<QueueEngine>, interval_seconds: u64) {
    let Some(lease) = engine.policy().lease_timeout else {
        tracing::info!("lease expiry disabled, reaper not started");
        return;
    };

    let interval = Duration::from_secs(interval_seconds.max(1));
    tracing::info!(
        lease_seconds = lease.as_secs(),
        interval_seconds = interval.as_secs(),
        "starting lease reaper task"
    );

    loop {
        sleep(interval).await;
        run_once(&engine).await;
    }
}

/// One reaper pass on the blocking pool. Failures are logged, never fatal.
pub async fn run_once(engine: &Arc<QueueEngine>) -> usize {
    let engine = Arc::clone(engine);
    match tokio::task::spawn_blocking(move || engine.release_expired()).await {
        Ok(Ok(released)) => {
            if released == 0 {
                tracing::debug!("no expired claims");
            }
            released
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to release expired claims");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "lease reaper panicked or was cancelled");
            0
        }
    }
}
