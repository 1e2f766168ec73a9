//! Per-user creator preferences: a five-state machine keyed by creator id.
//!
//! A creator is followed, positive (top/rising pools), watched, skipped, or
//! absent. Engagements pull creators back toward the positive pools; skips
//! push them through watched into the hard-skip cool-off pool, gated by a
//! re-entry delay.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, PoolCaps, ScoringConfig};
use crate::error::Result;
use crate::models::{CoolOffEntry, CreatorNode, ProfileState};
use crate::pools;
use crate::services::profile_access::ProfileAccess;
use crate::util::now_ms;

#[derive(Debug, Clone, Copy)]
pub enum CreatorSignal {
    /// Positive engagement with the given weighted score.
    Engage(f64),
    Skip,
}

/// Apply one signal to the creator state machine.
pub fn apply_creator_signal(
    state: &mut ProfileState,
    creator_id: Uuid,
    signal: CreatorSignal,
    scoring: &ScoringConfig,
    caps: &PoolCaps,
    alpha: f64,
    now_ms: i64,
) {
    let threshold = scoring.hard_skip_threshold;

    // FOLLOWED eclipses every other pool.
    if let Some(followed) = state
        .following
        .iter_mut()
        .find(|f| f.user_id == creator_id)
    {
        match signal {
            CreatorSignal::Engage(weight) => {
                followed.skips = followed.skips.saturating_sub(1);
                pools::update_node_score(
                    followed,
                    weight,
                    alpha,
                    scoring.half_life_days,
                    now_ms,
                );
            }
            CreatorSignal::Skip => {
                followed.skips = (followed.skips + 1).min(threshold);
                followed.last_skip_at = Some(now_ms);
                pools::update_node_score(
                    followed,
                    scoring.skip_weight,
                    alpha,
                    scoring.half_life_days,
                    now_ms,
                );
            }
        }
        if followed.skips >= threshold {
            followed.score = 0.0;
            followed.reentry_at = Some(now_ms + scoring.reentry_delay_ms);
        }
        return;
    }

    let creators = &mut state.creators;

    match signal {
        CreatorSignal::Engage(weight) => {
            // SKIPPED: engagement chips away at the skip count; release to
            // watched only once below threshold and past the re-entry gate.
            if let Some(idx) = creators
                .skipped_creators_pool
                .iter()
                .position(|e| e.creator_id == creator_id)
            {
                let entry = &mut creators.skipped_creators_pool[idx];
                entry.skips = entry.skips.saturating_sub(1);
                entry.last_skip_update = now_ms;
                if entry.skips < threshold && now_ms >= entry.reentry_at {
                    let released = creators.skipped_creators_pool.remove(idx);
                    creators.watched_creators_pool.push(CoolOffEntry {
                        creator_id,
                        skips: released.skips,
                        last_skip_update: now_ms,
                        reentry_at: released.reentry_at,
                    });
                } else if entry.skips >= threshold {
                    entry.reentry_at = now_ms + scoring.reentry_delay_ms;
                }
                return;
            }

            // WATCHED: decrement; at zero the creator graduates back to the
            // positive pools below.
            if let Some(idx) = creators
                .watched_creators_pool
                .iter()
                .position(|e| e.creator_id == creator_id)
            {
                let entry = &mut creators.watched_creators_pool[idx];
                entry.skips = entry.skips.saturating_sub(1);
                entry.last_skip_update = now_ms;
                if entry.skips > 0 {
                    return;
                }
                creators.watched_creators_pool.remove(idx);
            }

            // POSITIVE or ABSENT.
            let mut node = pools::take_node(
                &mut creators.top_creators,
                &mut creators.rising_creators,
                &creator_id,
            )
            .unwrap_or_else(|| CreatorNode::new(creator_id, now_ms));
            pools::update_node_score(&mut node, weight, alpha, scoring.half_life_days, now_ms);
            pools::insert_into_pools(
                &mut creators.top_creators,
                &mut creators.rising_creators,
                caps.top_creators,
                caps.rising_creators,
                node,
            );
        }

        CreatorSignal::Skip => {
            if let Some(entry) = creators
                .skipped_creators_pool
                .iter_mut()
                .find(|e| e.creator_id == creator_id)
            {
                entry.skips = (entry.skips + 1).min(threshold);
                entry.last_skip_update = now_ms;
                entry.reentry_at = now_ms + scoring.reentry_delay_ms;
                return;
            }

            if let Some(idx) = creators
                .watched_creators_pool
                .iter()
                .position(|e| e.creator_id == creator_id)
            {
                let entry = &mut creators.watched_creators_pool[idx];
                entry.skips += 1;
                entry.last_skip_update = now_ms;
                if entry.skips >= threshold {
                    let demoted = creators.watched_creators_pool.remove(idx);
                    creators.skipped_creators_pool.push(CoolOffEntry {
                        creator_id,
                        skips: demoted.skips,
                        last_skip_update: now_ms,
                        reentry_at: now_ms + scoring.reentry_delay_ms,
                    });
                }
                return;
            }

            // POSITIVE or ABSENT: an unknown creator is initialized at zero
            // score, so a first skip demotes straight into watched.
            let mut node = pools::take_node(
                &mut creators.top_creators,
                &mut creators.rising_creators,
                &creator_id,
            )
            .unwrap_or_else(|| CreatorNode::new(creator_id, now_ms));
            node.skips = (node.skips + 1).min(threshold);
            node.last_skip_at = Some(now_ms);
            pools::update_node_score(
                &mut node,
                scoring.skip_weight,
                alpha,
                scoring.half_life_days,
                now_ms,
            );

            if node.skips >= threshold {
                creators.skipped_creators_pool.push(CoolOffEntry {
                    creator_id,
                    skips: node.skips,
                    last_skip_update: now_ms,
                    reentry_at: now_ms + scoring.reentry_delay_ms,
                });
            } else if node.score <= 0.0 && node.skips >= 1 {
                creators.watched_creators_pool.push(CoolOffEntry {
                    creator_id,
                    skips: node.skips,
                    last_skip_update: now_ms,
                    reentry_at: now_ms,
                });
            } else {
                pools::insert_into_pools(
                    &mut creators.top_creators,
                    &mut creators.rising_creators,
                    caps.top_creators,
                    caps.rising_creators,
                    node,
                );
            }
        }
    }
}

/// Force follow state to a known value. Returns true when anything changed.
pub fn set_follow(state: &mut ProfileState, creator_id: Uuid, following: bool, now_ms: i64) -> bool {
    let idx = state
        .following
        .iter()
        .position(|f| f.user_id == creator_id);
    match (following, idx) {
        (true, None) => {
            state
                .following
                .push(crate::models::FollowedCreator::new(creator_id, now_ms));
            true
        }
        (false, Some(idx)) => {
            state.following.remove(idx);
            true
        }
        _ => false,
    }
}

/// Toggle follow state. Returns true when the user now follows the creator.
pub fn toggle_follow(state: &mut ProfileState, creator_id: Uuid, now_ms: i64) -> bool {
    if let Some(idx) = state
        .following
        .iter()
        .position(|f| f.user_id == creator_id)
    {
        state.following.remove(idx);
        false
    } else {
        state
            .following
            .push(crate::models::FollowedCreator::new(creator_id, now_ms));
        true
    }
}

pub struct CreatorService {
    config: Arc<Config>,
}

impl CreatorService {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub async fn score_creator(
        &self,
        access: &dyn ProfileAccess,
        creator_id: Uuid,
        engagement_score: f64,
    ) -> Result<()> {
        self.apply(access, creator_id, CreatorSignal::Engage(engagement_score))
            .await
    }

    pub async fn skip_creator(&self, access: &dyn ProfileAccess, creator_id: Uuid) -> Result<()> {
        self.apply(access, creator_id, CreatorSignal::Skip).await
    }

    pub async fn toggle_follow(
        &self,
        access: &dyn ProfileAccess,
        creator_id: Uuid,
    ) -> Result<bool> {
        let mut state = access.load().await?;
        let following = toggle_follow(&mut state, creator_id, now_ms());
        access.store(&state).await?;
        debug!(
            user_id = %access.user_id(),
            creator_id = %creator_id,
            following = following,
            "Follow toggled"
        );
        Ok(following)
    }

    /// Mirror a known follow state into a backing (used to keep the session
    /// blob aligned with the persistent outcome).
    pub async fn set_follow(
        &self,
        access: &dyn ProfileAccess,
        creator_id: Uuid,
        following: bool,
    ) -> Result<()> {
        let mut state = access.load().await?;
        if set_follow(&mut state, creator_id, following, now_ms()) {
            access.store(&state).await?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        access: &dyn ProfileAccess,
        creator_id: Uuid,
        signal: CreatorSignal,
    ) -> Result<()> {
        let mut state = access.load().await?;
        apply_creator_signal(
            &mut state,
            creator_id,
            signal,
            &self.config.scoring,
            &self.config.pools,
            access.ema_alpha(&self.config.scoring),
            now_ms(),
        );
        access.store(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FollowedCreator;

    fn scoring() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn caps() -> PoolCaps {
        PoolCaps::default()
    }

    fn skip(state: &mut ProfileState, creator: Uuid, now_ms: i64) {
        apply_creator_signal(
            state,
            creator,
            CreatorSignal::Skip,
            &scoring(),
            &caps(),
            0.7,
            now_ms,
        );
    }

    fn engage(state: &mut ProfileState, creator: Uuid, weight: f64, now_ms: i64) {
        apply_creator_signal(
            state,
            creator,
            CreatorSignal::Engage(weight),
            &scoring(),
            &caps(),
            0.7,
            now_ms,
        );
    }

    #[test]
    fn test_engagement_lands_in_top_pool() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        engage(&mut state, creator, 1.5, 1_000);

        assert_eq!(state.creators.top_creators.len(), 1);
        let node = &state.creators.top_creators[0];
        assert_eq!(node.creator_id, creator);
        assert!(node.score > 0.0);
        assert_eq!(node.skips, 0);
    }

    #[test]
    fn test_ten_consecutive_skips_hard_skip() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        let cfg = scoring();

        let mut now = 1_000;
        for _ in 0..10 {
            skip(&mut state, creator, now);
            now += 1_000;
        }

        let skipped = &state.creators.skipped_creators_pool;
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].skips, 10);
        let last_skip_at = now - 1_000;
        assert_eq!(skipped[0].reentry_at, last_skip_at + cfg.reentry_delay_ms);

        assert!(state.creators.top_creators.is_empty());
        assert!(state.creators.rising_creators.is_empty());
        assert!(state.creators.watched_creators_pool.is_empty());
    }

    #[test]
    fn test_first_skip_on_unknown_creator_goes_to_watched() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        skip(&mut state, creator, 1_000);

        assert_eq!(state.creators.watched_creators_pool.len(), 1);
        let entry = &state.creators.watched_creators_pool[0];
        assert_eq!(entry.skips, 1);
        assert_eq!(entry.reentry_at, 1_000);
    }

    #[test]
    fn test_followed_creator_survives_ten_skips() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        state.following.push(FollowedCreator::new(creator, 0));
        let cfg = scoring();

        let mut now = 1_000;
        for _ in 0..10 {
            skip(&mut state, creator, now);
            now += 1_000;
        }

        assert_eq!(state.following.len(), 1);
        let followed = &state.following[0];
        assert_eq!(followed.skips, 10);
        assert_eq!(followed.score, 0.0);
        assert_eq!(followed.reentry_at, Some(now - 1_000 + cfg.reentry_delay_ms));

        // Never demoted out of following.
        assert!(state.creators.skipped_creators_pool.is_empty());
        assert!(state.creators.watched_creators_pool.is_empty());
    }

    #[test]
    fn test_engagement_drains_watched_then_promotes() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        skip(&mut state, creator, 1_000);
        skip(&mut state, creator, 2_000);
        assert_eq!(state.creators.watched_creators_pool[0].skips, 2);

        engage(&mut state, creator, 1.0, 3_000);
        assert_eq!(state.creators.watched_creators_pool[0].skips, 1);
        assert!(state.creators.top_creators.is_empty());

        engage(&mut state, creator, 1.0, 4_000);
        assert!(state.creators.watched_creators_pool.is_empty());
        assert_eq!(state.creators.top_creators.len(), 1);
    }

    #[test]
    fn test_skipped_release_gated_by_reentry() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        let cfg = scoring();

        let mut now = 1_000;
        for _ in 0..10 {
            skip(&mut state, creator, now);
            now += 1_000;
        }
        let reentry_at = state.creators.skipped_creators_pool[0].reentry_at;

        // Engagement before the gate stays skipped.
        engage(&mut state, creator, 1.0, now);
        assert_eq!(state.creators.skipped_creators_pool.len(), 1);
        assert_eq!(state.creators.skipped_creators_pool[0].skips, 9);

        // Past the gate and under threshold: released to watched.
        engage(&mut state, creator, 1.0, reentry_at + cfg.reentry_delay_ms);
        assert!(state.creators.skipped_creators_pool.is_empty());
        assert_eq!(state.creators.watched_creators_pool.len(), 1);
        assert_eq!(state.creators.watched_creators_pool[0].skips, 8);
    }

    #[test]
    fn test_positive_creator_demoted_after_skips() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();
        engage(&mut state, creator, 10.0, 1_000);
        assert_eq!(state.creators.top_creators.len(), 1);

        // Score is high enough to survive a couple of skips in place.
        skip(&mut state, creator, 2_000);
        assert_eq!(
            state.creators.top_creators.len() + state.creators.rising_creators.len(),
            1
        );
        let node = &state.creators.top_creators[0];
        assert_eq!(node.skips, 1);

        // Grind the score down: once non-positive, demote to watched.
        skip(&mut state, creator, 3_000);
        skip(&mut state, creator, 4_000);
        assert!(state.creators.top_creators.is_empty());
        assert_eq!(state.creators.watched_creators_pool.len(), 1);
    }

    #[test]
    fn test_toggle_follow_round_trip() {
        let mut state = ProfileState::default();
        let creator = Uuid::new_v4();

        assert!(toggle_follow(&mut state, creator, 1_000));
        assert_eq!(state.following.len(), 1);
        assert_eq!(state.following[0].score, 0.0);

        assert!(!toggle_follow(&mut state, creator, 2_000));
        assert!(state.following.is_empty());
    }
}
