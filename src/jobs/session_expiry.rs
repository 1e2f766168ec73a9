//! Expiry worker: every tick, drain sessions idle past the TTL through the
//! merge-back path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics;
use crate::services::session_lifecycle::SessionLifecycle;

pub async fn start_session_expiry_worker(
    lifecycle: Arc<SessionLifecycle>,
    tick_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting session expiry worker (tick={}s)",
        tick_seconds
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(tick_seconds)) => {
                match lifecycle.sweep_expired().await {
                    Ok(0) => {}
                    Ok(count) => {
                        metrics::SESSIONS_EXPIRED.inc_by(count as u64);
                        info!(sessions = count, "Expiry sweep completed");
                    }
                    Err(e) => error!("Expiry sweep failed: {:?}", e),
                }
            }
            _ = shutdown.changed() => {
                // Finish the current batch semantics: one last sweep, then exit.
                if let Err(e) = lifecycle.sweep_expired().await {
                    error!("Final expiry sweep failed: {:?}", e);
                }
                info!("Session expiry worker shutting down");
                return;
            }
        }
    }
}
