//! Interest scoring across the category → subcategory → specific hierarchy.
//!
//! Each engagement performs the dual update: counter increments against the
//! global/user stats documents, then Bayesian-smoothed pool placement. The
//! pure placement logic below is shared by both profile backings.

use std::sync::Arc;
use tracing::debug;

use crate::config::{Config, PoolCaps};
use crate::db::StatsRepo;
use crate::error::Result;
use crate::models::{CategoryNode, EntityType, ProfileState, SpecificNode, SubNode};
use crate::pools;
use crate::scoring;
use crate::services::profile_access::ProfileAccess;
use crate::util::now_ms;

/// Smoothed per-level scores ready for pool placement. The specific level
/// carries the raw engagement weight, not a smoothed value.
#[derive(Debug, Clone, Copy)]
pub struct LevelScores {
    pub category: f64,
    pub sub: Option<f64>,
    pub specific: Option<f64>,
}

/// Place one engagement into the interest tree.
pub fn apply_interest_scores(
    state: &mut ProfileState,
    category: &str,
    sub: Option<&str>,
    specific: Option<&str>,
    scores: LevelScores,
    caps: &PoolCaps,
    alpha: f64,
    half_life_days: f64,
    now_ms: i64,
) {
    let mut cat = pools::take_node(
        &mut state.top_interests,
        &mut state.rising_interests,
        &category.to_string(),
    )
    .unwrap_or_else(|| CategoryNode::new(category, now_ms));
    pools::update_node_score(&mut cat, scores.category, alpha, half_life_days, now_ms);

    if let (Some(sub_name), Some(sub_score)) = (sub, scores.sub) {
        let mut sub_node = pools::take_node(
            &mut cat.top_subs,
            &mut cat.rising_subs,
            &sub_name.to_string(),
        )
        .unwrap_or_else(|| SubNode::new(sub_name, now_ms));
        pools::update_node_score(&mut sub_node, sub_score, alpha, half_life_days, now_ms);

        if let (Some(spec_name), Some(spec_score)) = (specific, scores.specific) {
            let mut spec_node =
                pools::take_from_pool(&mut sub_node.specific, &spec_name.to_string())
                    .unwrap_or_else(|| SpecificNode::new(spec_name, now_ms));
            pools::update_node_score(&mut spec_node, spec_score, alpha, half_life_days, now_ms);
            pools::insert_into_pool(&mut sub_node.specific, caps.specifics, spec_node);
        }

        pools::insert_into_pools(
            &mut cat.top_subs,
            &mut cat.rising_subs,
            caps.top_subs,
            caps.rising_subs,
            sub_node,
        );
    }

    pools::insert_into_pools(
        &mut state.top_interests,
        &mut state.rising_interests,
        caps.top_categories,
        caps.rising_categories,
        cat,
    );
}

/// Apply a skip at each provided level. Nodes whose updated score drops to
/// zero or below are removed from their pools. Returns false when the
/// category is unknown to the profile (no-op).
pub fn apply_interest_skip(
    state: &mut ProfileState,
    category: &str,
    sub: Option<&str>,
    specific: Option<&str>,
    skip_weight: f64,
    caps: &PoolCaps,
    alpha: f64,
    half_life_days: f64,
    now_ms: i64,
) -> bool {
    let Some(mut cat) = pools::take_node(
        &mut state.top_interests,
        &mut state.rising_interests,
        &category.to_string(),
    ) else {
        return false;
    };

    pools::update_node_score(&mut cat, skip_weight, alpha, half_life_days, now_ms);

    if let Some(sub_name) = sub {
        if let Some(mut sub_node) = pools::take_node(
            &mut cat.top_subs,
            &mut cat.rising_subs,
            &sub_name.to_string(),
        ) {
            pools::update_node_score(&mut sub_node, skip_weight, alpha, half_life_days, now_ms);

            if let Some(spec_name) = specific {
                if let Some(mut spec_node) =
                    pools::take_from_pool(&mut sub_node.specific, &spec_name.to_string())
                {
                    pools::update_node_score(
                        &mut spec_node,
                        skip_weight,
                        alpha,
                        half_life_days,
                        now_ms,
                    );
                    if spec_node.score > 0.0 {
                        pools::insert_into_pool(&mut sub_node.specific, caps.specifics, spec_node);
                    }
                }
            }

            if sub_node.score > 0.0 {
                pools::insert_into_pools(
                    &mut cat.top_subs,
                    &mut cat.rising_subs,
                    caps.top_subs,
                    caps.rising_subs,
                    sub_node,
                );
            }
        }
    }

    if cat.score > 0.0 {
        pools::insert_into_pools(
            &mut state.top_interests,
            &mut state.rising_interests,
            caps.top_categories,
            caps.rising_categories,
            cat,
        );
    }
    true
}

pub struct InterestService {
    stats: Arc<StatsRepo>,
    config: Arc<Config>,
}

impl InterestService {
    pub fn new(stats: Arc<StatsRepo>, config: Arc<Config>) -> Self {
        Self { stats, config }
    }

    /// Score an engagement against the interest tree through either backing.
    pub async fn score_interest(
        &self,
        access: &dyn ProfileAccess,
        category: &str,
        sub: Option<&str>,
        specific: Option<&str>,
        engagement_score: f64,
    ) -> Result<()> {
        let user_id = access.user_id();

        let cat_score = self
            .smoothed_level_score(user_id, EntityType::Category, category, engagement_score)
            .await?;
        let sub_score = match sub {
            Some(name) => Some(
                self.smoothed_level_score(
                    user_id,
                    EntityType::Subcategory,
                    name,
                    engagement_score,
                )
                .await?,
            ),
            None => None,
        };

        let scores = LevelScores {
            category: cat_score,
            sub: sub_score,
            specific: specific.map(|_| engagement_score),
        };

        let mut state = access.load().await?;
        apply_interest_scores(
            &mut state,
            category,
            sub,
            specific,
            scores,
            &self.config.pools,
            access.ema_alpha(&self.config.scoring),
            self.config.scoring.half_life_days,
            now_ms(),
        );
        access.store(&state).await?;

        debug!(
            user_id = %user_id,
            category = category,
            score = engagement_score,
            "Interest scored"
        );
        Ok(())
    }

    pub async fn skip_interest(
        &self,
        access: &dyn ProfileAccess,
        category: &str,
        sub: Option<&str>,
        specific: Option<&str>,
    ) -> Result<()> {
        let mut state = access.load().await?;
        let touched = apply_interest_skip(
            &mut state,
            category,
            sub,
            specific,
            self.config.scoring.skip_weight,
            &self.config.pools,
            access.ema_alpha(&self.config.scoring),
            self.config.scoring.half_life_days,
            now_ms(),
        );
        if touched {
            access.store(&state).await?;
        }
        Ok(())
    }

    /// Counter increment plus Bayesian smoothing for one hierarchy level.
    async fn smoothed_level_score(
        &self,
        user_id: uuid::Uuid,
        entity: EntityType,
        name: &str,
        engagement_score: f64,
    ) -> Result<f64> {
        self.stats.bump_global(entity, name, 1, engagement_score).await?;
        self.stats
            .bump_user_interest(user_id, entity, name, 1, engagement_score)
            .await?;

        let global = self.stats.global(entity, name).await?;
        let user = self.stats.user_interest(user_id, entity, name).await?;

        let prior_count = scoring::choose_prior_count(global.impression_count);
        Ok(scoring::bayesian_smooth(
            global.avg(),
            prior_count,
            user.total_engagement,
            user.impression_count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolCaps;

    fn caps() -> PoolCaps {
        PoolCaps::default()
    }

    fn score_once(state: &mut ProfileState, category: &str, sub: Option<&str>, score: f64) {
        apply_interest_scores(
            state,
            category,
            sub,
            None,
            LevelScores {
                category: score,
                sub: sub.map(|_| score),
                specific: None,
            },
            &caps(),
            0.7,
            0.5,
            1_000,
        );
    }

    #[test]
    fn test_cold_profile_gains_category_node() {
        let mut state = ProfileState::default();
        score_once(&mut state, "Tech", Some("AI"), 1.5);

        assert_eq!(state.top_interests.len(), 1);
        let cat = &state.top_interests[0];
        assert_eq!(cat.name, "Tech");
        assert!(cat.score > 0.0);
        assert_eq!(cat.top_subs.len(), 1);
        assert_eq!(cat.top_subs[0].name, "AI");
    }

    #[test]
    fn test_specific_level_uses_raw_score() {
        let mut state = ProfileState::default();
        apply_interest_scores(
            &mut state,
            "Tech",
            Some("AI"),
            Some("LLMs"),
            LevelScores {
                category: 0.9,
                sub: Some(0.8),
                specific: Some(2.0),
            },
            &caps(),
            0.7,
            0.5,
            1_000,
        );
        let spec = &state.top_interests[0].top_subs[0].specific[0];
        assert_eq!(spec.name, "LLMs");
        assert!((spec.score - 0.7 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pool_caps_hold_after_many_categories() {
        let mut state = ProfileState::default();
        for i in 0..50 {
            score_once(&mut state, &format!("cat{}", i), None, 1.0 + i as f64 * 0.01);
        }
        let pool_caps = caps();
        assert!(state.top_interests.len() <= pool_caps.top_categories);
        assert!(state.rising_interests.len() <= pool_caps.rising_categories);

        // Disjointness on name across the two pools.
        for cat in &state.top_interests {
            assert!(state.rising_interests.iter().all(|r| r.name != cat.name));
        }
    }

    #[test]
    fn test_skip_unknown_category_is_noop() {
        let mut state = ProfileState::default();
        let touched =
            apply_interest_skip(&mut state, "Nope", None, None, -1.5, &caps(), 0.7, 0.5, 1_000);
        assert!(!touched);
    }

    #[test]
    fn test_skip_removes_nonpositive_node() {
        let mut state = ProfileState::default();
        score_once(&mut state, "Tech", None, 0.5);
        // One skip with a heavy negative weight drives the score below zero.
        let touched =
            apply_interest_skip(&mut state, "Tech", None, None, -1.5, &caps(), 0.7, 0.5, 2_000);
        assert!(touched);
        assert!(state.top_interests.is_empty());
        assert!(state.rising_interests.is_empty());
    }

    #[test]
    fn test_skip_repositions_surviving_node() {
        let mut state = ProfileState::default();
        score_once(&mut state, "Tech", None, 10.0);
        apply_interest_skip(&mut state, "Tech", None, None, -1.5, &caps(), 0.7, 0.5, 1_500);
        assert_eq!(state.top_interests.len(), 1);
        assert!(state.top_interests[0].score > 0.0);
        assert!(state.top_interests[0].score < 7.0);
    }
}
