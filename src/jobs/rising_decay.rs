//! Daily rising-pool decay: at 03:00 UTC every rising score in every user
//! profile is multiplied down so stale spikes fade without engagement.

use chrono::{Datelike, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::ProfileRepo;
use crate::models::ProfileState;

const USER_BATCH: i64 = 200;

/// Multiply every rising-tier score in the profile. Returns true when any
/// node was touched.
pub fn apply_rising_decay(state: &mut ProfileState, factor: f64, now_ms: i64) -> bool {
    let mut touched = false;

    for cat in state.rising_interests.iter_mut() {
        cat.score *= factor;
        cat.last_updated = now_ms;
        touched = true;
        for sub in cat.rising_subs.iter_mut() {
            sub.score *= factor;
            sub.last_updated = now_ms;
        }
    }
    for cat in state.top_interests.iter_mut() {
        for sub in cat.rising_subs.iter_mut() {
            sub.score *= factor;
            sub.last_updated = now_ms;
            touched = true;
        }
    }
    for creator in state.creators.rising_creators.iter_mut() {
        creator.score *= factor;
        creator.last_updated = now_ms;
        touched = true;
    }
    touched
}

fn seconds_until_daily_run(hour: u32) -> u64 {
    let now = Utc::now();
    let today_run = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, 0, 0)
        .single()
        .unwrap_or(now);
    let next = if today_run > now {
        today_run
    } else {
        today_run + chrono::Duration::days(1)
    };
    (next - now).num_seconds().max(1) as u64
}

pub async fn start_rising_decay(
    profiles: Arc<ProfileRepo>,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting rising decay job (daily at 03:00 UTC)");

    loop {
        let wait = seconds_until_daily_run(3);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {
                if let Err(e) = decay_all_profiles(&profiles, &config).await {
                    error!("Rising decay sweep failed: {:?}", e);
                }
            }
            _ = shutdown.changed() => {
                info!("Rising decay job shutting down");
                return;
            }
        }
    }
}

async fn decay_all_profiles(profiles: &ProfileRepo, config: &Config) -> crate::error::Result<()> {
    let factor = config.scoring.rising_decay_factor;
    let now_ms = crate::util::now_ms();
    let mut cursor = None;
    let mut updated = 0usize;

    loop {
        let batch = profiles.user_ids_after(cursor, USER_BATCH).await?;
        let Some(last) = batch.last().copied() else {
            break;
        };
        cursor = Some(last);

        for user_id in batch {
            let profile = match profiles.load(user_id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Decay load failed, skipping");
                    continue;
                }
            };
            let mut state = profile.state;
            if apply_rising_decay(&mut state, factor, now_ms) {
                if let Err(e) = profiles.save_state(user_id, &state).await {
                    warn!(user_id = %user_id, error = %e, "Decay save failed, skipping");
                } else {
                    updated += 1;
                }
            }
        }
    }

    info!(profiles = updated, "Rising decay sweep completed");
    Ok(())
}
