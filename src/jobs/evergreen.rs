//! Evergreen recompute: every two hours, posts with enough lifetime score
//! get their evergreen flag re-evaluated from the velocity ratio.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::db::PostRepo;

const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

pub async fn start_evergreen_recompute(
    posts: Arc<PostRepo>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting evergreen recompute job (interval={}h)",
        RECOMPUTE_INTERVAL.as_secs() / 3600
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(RECOMPUTE_INTERVAL) => {
                match posts
                    .evergreen_sweep(
                        config.scoring.min_raw_for_evergreen,
                        config.scoring.evergreen_velocity_ratio,
                    )
                    .await
                {
                    Ok(rows) => info!(posts = rows, "Evergreen recompute completed"),
                    Err(e) => error!("Evergreen recompute failed: {:?}", e),
                }
            }
            _ = shutdown.changed() => {
                info!("Evergreen recompute job shutting down");
                return;
            }
        }
    }
}
