//! Per-post velocity and popularity metrics.
//!
//! Every engagement (or buffered score delta) advances two continuous-time
//! EMAs, recomputes the trending score from their ratio, re-evaluates the
//! rising flag, and refreshes the Bayesian score from creator/category
//! priors whose strength decays with post age.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, ScoringConfig};
use crate::db::{PostRepo, StatsRepo};
use crate::error::{AppError, Result};
use crate::models::{EntityType, Post, StatCounters, WindowEvent};
use crate::scoring;
use crate::util::now_ms;

const VELOCITY_EPSILON: f64 = 1e-6;

/// Advance all metric fields of a post for one weighted engagement.
pub fn apply_post_engagement(
    post: &mut Post,
    weight: f64,
    category_stats: &StatCounters,
    creator_stats: Option<&StatCounters>,
    cfg: &ScoringConfig,
    now_ms: i64,
) {
    // Bounded rising window: evict expired events, then append.
    let window_start = now_ms - cfg.rising_window_ms;
    post.window_events.retain(|e| e.ts >= window_start);
    post.window_events.push(WindowEvent {
        ts: now_ms,
        weight,
    });
    if post.window_events.len() > cfg.window_events_cap {
        let excess = post.window_events.len() - cfg.window_events_cap;
        post.window_events.drain(0..excess);
    }

    let created_ms = post.created_at.timestamp_millis();
    let last_update_ms = post.last_trending_update.timestamp_millis();
    let first_batch = last_update_ms == created_ms;
    let elapsed_ms = (now_ms - last_update_ms).max(0) as f64;

    // Continuous-time EMA: alpha grows with the gap since the last update.
    let lambda_short = std::f64::consts::LN_2 / cfg.short_half_life_ms;
    let lambda_long = std::f64::consts::LN_2 / cfg.long_half_life_ms;
    let alpha_short = 1.0 - (-lambda_short * elapsed_ms).exp();
    let alpha_long = 1.0 - (-lambda_long * elapsed_ms).exp();

    post.short_term_velocity_ema =
        post.short_term_velocity_ema * (1.0 - alpha_short) + weight * alpha_short;
    post.historical_velocity_ema =
        post.historical_velocity_ema * (1.0 - alpha_long) + weight * alpha_long;

    let velocity_ratio =
        post.short_term_velocity_ema / (post.historical_velocity_ema + VELOCITY_EPSILON);
    let ratio_score = cfg.trending_weight * velocity_ratio.powf(cfg.trending_exponent);
    let normalized_activity =
        (post.short_term_velocity_ema / cfg.trending_activity_normalizer).min(1.0);
    let burst_score = cfg.trending_weight * cfg.trending_burst_factor * normalized_activity;
    post.trending_score = ratio_score + burst_score;

    post.is_rising = if first_batch {
        weight >= cfg.min_initial_rising_weight
    } else {
        velocity_ratio >= cfg.rising_rate_multiplier
    };

    // Bayesian score: creator-leaning prior mean, prior strength decaying
    // with post age, then global time decay.
    let category_avg = category_stats.avg();
    let creator_avg = creator_stats
        .filter(|c| c.impression_count > 0)
        .map(|c| c.avg())
        .unwrap_or(category_avg);
    let prior_mean =
        cfg.prior_creator_weight * creator_avg + (1.0 - cfg.prior_creator_weight) * category_avg;

    let age_ms = (now_ms - created_ms).max(0) as f64;
    let prior_lambda = std::f64::consts::LN_2 / (cfg.prior_half_life_hours * 3_600_000.0);
    let initial_prior = scoring::choose_prior_count(post.impression_count);
    let decayed_prior = (initial_prior * (-prior_lambda * age_ms).exp()).max(cfg.prior_min_count);

    let smoothed_avg = scoring::bayesian_smooth(
        prior_mean,
        decayed_prior,
        post.engagement_sum,
        post.impression_count,
    );
    let age_days = age_ms / scoring::MS_PER_DAY;
    let time_decay = (-std::f64::consts::LN_2 / cfg.half_life_days * age_days).exp();
    post.bayesian_score = smoothed_avg * time_decay;

    post.raw_score += weight;
    post.cumulative_score += weight;

    let now = chrono::DateTime::from_timestamp_millis(now_ms).unwrap_or(post.created_at);
    post.last_trending_update = now;
    post.last_score_update = now;
}

pub struct PostMetricsService {
    posts: Arc<PostRepo>,
    stats: Arc<StatsRepo>,
    config: Arc<Config>,
}

impl PostMetricsService {
    pub fn new(posts: Arc<PostRepo>, stats: Arc<StatsRepo>, config: Arc<Config>) -> Self {
        Self {
            posts,
            stats,
            config,
        }
    }

    /// Apply a weighted engagement (or an aggregated score delta) to a post.
    pub async fn record(&self, post_id: Uuid, weight: f64) -> Result<()> {
        let mut post = self
            .posts
            .get(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))?;

        // Stats documents are initialized here; their counters move through
        // the engagement stats consumer.
        self.stats
            .ensure_global(EntityType::Category, &post.category)
            .await?;
        self.stats.ensure_creator(post.creator).await?;

        let category_stats = self
            .stats
            .global(EntityType::Category, &post.category)
            .await?;
        let creator_stats = self.stats.creator(post.creator).await?;

        apply_post_engagement(
            &mut post,
            weight,
            &category_stats,
            creator_stats.as_ref(),
            &self.config.scoring,
            now_ms(),
        );
        self.posts.save_metrics(&post).await?;

        debug!(
            post_id = %post_id,
            weight = weight,
            trending = post.trending_score,
            rising = post.is_rising,
            "Post metrics updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn fresh_post(created_ms: i64) -> Post {
        let created: DateTime<Utc> = DateTime::from_timestamp_millis(created_ms).unwrap();
        Post {
            id: Uuid::new_v4(),
            creator: Uuid::new_v4(),
            category: "Tech".to_string(),
            sub_category: "AI".to_string(),
            specific: None,
            impression_count: 0,
            engagement_sum: 0.0,
            raw_score: 0.0,
            trending_score: 0.0,
            short_term_velocity_ema: 0.0,
            historical_velocity_ema: 0.0,
            bayesian_score: 0.0,
            cumulative_score: 0.0,
            is_evergreen: false,
            is_rising: false,
            window_events: Vec::new(),
            created_at: created,
            last_trending_update: created,
            last_score_update: created,
        }
    }

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn test_first_batch_rising_threshold() {
        let stats = StatCounters::default();

        let mut quiet = fresh_post(0);
        apply_post_engagement(&mut quiet, 1.0, &stats, None, &cfg(), 60_000);
        assert!(!quiet.is_rising);

        let mut burst = fresh_post(0);
        apply_post_engagement(&mut burst, 10.0, &stats, None, &cfg(), 60_000);
        assert!(burst.is_rising);
    }

    #[test]
    fn test_repeated_engagements_within_hour() {
        let stats = StatCounters::default();
        let mut post = fresh_post(0);
        let ten_minutes = 600_000;

        for i in 1..=3 {
            apply_post_engagement(&mut post, 1.0, &stats, None, &cfg(), i * ten_minutes);
        }

        assert!(post.short_term_velocity_ema > post.historical_velocity_ema);
        assert!(post.is_rising);
        assert!(post.trending_score > 0.0);
        assert_eq!(post.window_events.len(), 3);
        assert_eq!(post.raw_score, 3.0);
        assert_eq!(post.cumulative_score, 3.0);
    }

    #[test]
    fn test_window_evicts_expired_events() {
        let stats = StatCounters::default();
        let mut post = fresh_post(0);
        let config = cfg();

        apply_post_engagement(&mut post, 1.0, &stats, None, &config, 60_000);
        // Two hours later the first event is outside the rising window.
        apply_post_engagement(&mut post, 1.0, &stats, None, &config, 7_200_000);
        assert_eq!(post.window_events.len(), 1);
        assert_eq!(post.window_events[0].ts, 7_200_000);
    }

    #[test]
    fn test_window_hard_cap() {
        let stats = StatCounters::default();
        let mut post = fresh_post(0);
        let config = cfg();

        for i in 0..(config.window_events_cap + 50) {
            // Keep all events inside the window; the hard cap must bound it.
            apply_post_engagement(&mut post, 0.1, &stats, None, &config, 1_000 + i as i64);
        }
        assert_eq!(post.window_events.len(), config.window_events_cap);
    }

    #[test]
    fn test_bayesian_score_decays_with_age() {
        let stats = StatCounters {
            impression_count: 1_000,
            total_engagement: 800.0,
        };
        let config = cfg();

        let mut young = fresh_post(0);
        young.impression_count = 10;
        young.engagement_sum = 12.0;
        apply_post_engagement(&mut young, 1.0, &stats, None, &config, 600_000);

        let mut old = fresh_post(0);
        old.impression_count = 10;
        old.engagement_sum = 12.0;
        // Same engagement profile, two days old.
        apply_post_engagement(&mut old, 1.0, &stats, None, &config, 2 * 86_400_000);

        assert!(young.bayesian_score > old.bayesian_score);
        assert!(old.bayesian_score > 0.0);
    }

    #[test]
    fn test_creator_prior_falls_back_to_category() {
        let category = StatCounters {
            impression_count: 100,
            total_engagement: 50.0,
        };
        let empty_creator = StatCounters::default();
        let config = cfg();

        let mut with_empty = fresh_post(0);
        apply_post_engagement(
            &mut with_empty,
            1.0,
            &category,
            Some(&empty_creator),
            &config,
            60_000,
        );

        let mut without = fresh_post(0);
        apply_post_engagement(&mut without, 1.0, &category, None, &config, 60_000);

        // An empty creator document must behave exactly like no document.
        assert!((with_empty.bayesian_score - without.bayesian_score).abs() < 1e-12);
    }
}
