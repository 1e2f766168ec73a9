use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Read an env var, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub scoring: ScoringConfig,
    pub pools: PoolCaps,
    pub feed: FeedConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub engagement_topic: String,
    pub score_topic: String,
    pub stats_group: String,
    pub aggregator_group: String,
}

/// Tunables for the scoring primitives, post metrics and creator state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Half-life of profile node scores, in days.
    pub half_life_days: f64,
    /// Short velocity EMA half-life (ms).
    pub short_half_life_ms: f64,
    /// Long velocity EMA half-life (ms).
    pub long_half_life_ms: f64,
    pub ema_alpha_session: f64,
    pub ema_alpha_db: f64,
    pub session_blend_alpha: f64,
    pub skip_weight: f64,
    pub hard_skip_threshold: u32,
    /// Merge-back demotion tier: blended skips at or above this land in watched.
    pub watched_threshold: u32,
    pub reentry_delay_ms: i64,
    pub prior_creator_weight: f64,
    pub prior_min_count: f64,
    pub prior_half_life_hours: f64,
    pub trending_weight: f64,
    pub trending_exponent: f64,
    pub trending_burst_factor: f64,
    pub trending_activity_normalizer: f64,
    pub rising_window_ms: i64,
    pub window_events_cap: usize,
    pub min_initial_rising_weight: f64,
    pub rising_rate_multiplier: f64,
    /// Daily multiplicative decay applied to rising pools.
    pub rising_decay_factor: f64,
    pub min_raw_for_evergreen: f64,
    pub evergreen_velocity_ratio: f64,
    pub weight_view: f64,
    pub weight_like: f64,
    pub weight_comment: f64,
    pub weight_share: f64,
    pub weight_completion: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_days: 0.5,
            short_half_life_ms: 3_600_000.0,
            long_half_life_ms: 86_400_000.0,
            ema_alpha_session: 0.7,
            ema_alpha_db: 0.25,
            session_blend_alpha: 0.25,
            skip_weight: -1.5,
            hard_skip_threshold: 10,
            watched_threshold: 2,
            reentry_delay_ms: 7 * 24 * 3_600_000,
            prior_creator_weight: 0.4,
            prior_min_count: 1.0,
            prior_half_life_hours: 2.0,
            trending_weight: 1.0,
            trending_exponent: 1.5,
            trending_burst_factor: 0.5,
            trending_activity_normalizer: 50.0,
            rising_window_ms: 3_600_000,
            window_events_cap: 200,
            min_initial_rising_weight: 10.0,
            rising_rate_multiplier: 2.0,
            rising_decay_factor: 0.9,
            min_raw_for_evergreen: 1000.0,
            evergreen_velocity_ratio: 0.01,
            weight_view: 0.5,
            weight_like: 1.0,
            weight_comment: 2.5,
            weight_share: 5.0,
            weight_completion: 4.0,
        }
    }
}

/// Hard upper bounds for every profile pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCaps {
    pub top_categories: usize,
    pub rising_categories: usize,
    pub top_subs: usize,
    pub rising_subs: usize,
    pub specifics: usize,
    pub top_creators: usize,
    pub rising_creators: usize,
}

impl Default for PoolCaps {
    fn default() -> Self {
        Self {
            top_categories: 20,
            rising_categories: 12,
            top_subs: 6,
            rising_subs: 4,
            specifics: 2,
            top_creators: 50,
            rising_creators: 25,
        }
    }
}

/// Feed assembly tunables: composite weights, bucket slot caps, exploration odds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub feed_size: usize,
    /// Picks taken by fair-share interleaving; the remainder is exploration padding.
    pub non_explore: usize,
    pub personal_weight: f64,
    pub interest_weight: f64,
    pub creator_weight: f64,
    pub raw_weight: f64,
    pub trend_weight: f64,
    pub bayesian_weight: f64,
    pub recent_window_ms: i64,
    pub skip_reentry_prob: f64,
    pub watched_prob: f64,
    /// Fallback fraction of the population average when a candidate has no profile node.
    pub cold_start_factor: f64,
    pub cap_skip_reentry: usize,
    pub cap_watched: usize,
    pub cap_cat_top: usize,
    pub cap_cat_rising: usize,
    pub cap_cat_extra: usize,
    pub cap_creator_top: usize,
    pub cap_creator_rising: usize,
    pub cap_creator_extra: usize,
    pub cap_creator_followed: usize,
    pub cap_trending: usize,
    pub cap_rising: usize,
    pub cap_recent: usize,
    pub cap_evergreen: usize,
    pub cap_unknown: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_size: 20,
            non_explore: 15,
            personal_weight: 0.5,
            interest_weight: 0.7,
            creator_weight: 0.3,
            raw_weight: 0.25,
            trend_weight: 0.25,
            bayesian_weight: 0.15,
            recent_window_ms: 3_600_000,
            skip_reentry_prob: 0.4,
            watched_prob: 0.4,
            cold_start_factor: 0.1,
            cap_skip_reentry: 1,
            cap_watched: 1,
            cap_cat_top: 3,
            cap_cat_rising: 3,
            cap_cat_extra: 3,
            cap_creator_top: 2,
            cap_creator_rising: 2,
            cap_creator_extra: 2,
            cap_creator_followed: 2,
            cap_trending: 2,
            cap_rising: 1,
            cap_recent: 1,
            cap_evergreen: 1,
            cap_unknown: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl_seconds: u64,
    pub expiry_tick_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            expiry_tick_seconds: 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl_ms(&self) -> i64 {
        self.ttl_seconds as i64 * 1000
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let scoring = ScoringConfig {
            half_life_days: env_or("HALF_LIFE_DAYS", 0.5),
            short_half_life_ms: env_or("SHORT_HALF_LIFE_MS", 3_600_000.0),
            long_half_life_ms: env_or("LONG_HALF_LIFE_MS", 86_400_000.0),
            ema_alpha_session: env_or("EMA_ALPHA_SESSION", 0.7),
            ema_alpha_db: env_or("EMA_ALPHA_DB", 0.25),
            session_blend_alpha: env_or("SESSION_BLEND_ALPHA", 0.25),
            skip_weight: env_or("SKIP_WEIGHT", -1.5),
            hard_skip_threshold: env_or("HARD_SKIP_THRESHOLD", 10),
            watched_threshold: env_or("WATCHED_THRESHOLD", 2),
            reentry_delay_ms: env_or("REENTRY_DELAY_MS", 7 * 24 * 3_600_000),
            prior_creator_weight: env_or("PRIOR_CREATOR_WEIGHT", 0.4),
            prior_min_count: env_or("PRIOR_MIN_COUNT", 1.0),
            prior_half_life_hours: env_or("PRIOR_HALF_LIFE_HOURS", 2.0),
            trending_weight: env_or("TRENDING_WEIGHT", 1.0),
            trending_exponent: env_or("TRENDING_EXPONENT", 1.5),
            trending_burst_factor: env_or("TRENDING_BURST_FACTOR", 0.5),
            trending_activity_normalizer: env_or("TRENDING_ACTIVITY_NORMALIZER", 50.0),
            rising_window_ms: env_or("RISING_WINDOW_MS", 3_600_000),
            window_events_cap: env_or("WINDOW_EVENTS_CAP", 200),
            min_initial_rising_weight: env_or("MIN_INITIAL_RISING_WEIGHT", 10.0),
            rising_rate_multiplier: env_or("RISING_RATE_MULTIPLIER", 2.0),
            rising_decay_factor: env_or("RISING_DECAY_FACTOR", 0.9),
            min_raw_for_evergreen: env_or("MIN_RAW_FOR_EVERGREEN", 1000.0),
            evergreen_velocity_ratio: env_or("EVERGREEN_VELOCITY_RATIO", 0.01),
            weight_view: env_or("WEIGHT_VIEW", 0.5),
            weight_like: env_or("WEIGHT_LIKE", 1.0),
            weight_comment: env_or("WEIGHT_COMMENT", 2.5),
            weight_share: env_or("WEIGHT_SHARE", 5.0),
            weight_completion: env_or("WEIGHT_COMPLETION", 4.0),
        };

        let pools = PoolCaps {
            top_categories: env_or("TOP_CAT_MAX", 20),
            rising_categories: env_or("RISING_CAT_MAX", 12),
            top_subs: env_or("TOP_SUB_MAX", 6),
            rising_subs: env_or("RISING_SUB_MAX", 4),
            specifics: env_or("SPECIFIC_MAX", 2),
            top_creators: env_or("TOP_CREATOR_MAX", 50),
            rising_creators: env_or("RISING_CREATOR_MAX", 25),
        };

        let feed = FeedConfig {
            feed_size: env_or("FEED_SIZE", 20),
            non_explore: env_or("FEED_NON_EXPLORE", 15),
            personal_weight: env_or("FEED_PERSONAL_WEIGHT", 0.5),
            interest_weight: env_or("FEED_INTEREST_WEIGHT", 0.7),
            creator_weight: env_or("FEED_CREATOR_WEIGHT", 0.3),
            raw_weight: env_or("FEED_RAW_WEIGHT", 0.25),
            trend_weight: env_or("FEED_TREND_WEIGHT", 0.25),
            bayesian_weight: env_or("FEED_BAYESIAN_WEIGHT", 0.15),
            recent_window_ms: env_or("RECENT_WINDOW_MS", 3_600_000),
            skip_reentry_prob: env_or("FEED_SKIP_REENTRY_PROB", 0.4),
            watched_prob: env_or("FEED_WATCHED_PROB", 0.4),
            cold_start_factor: env_or("FEED_COLD_START_FACTOR", 0.1),
            cap_skip_reentry: env_or("FEED_CAP_SKIP_REENTRY", 1),
            cap_watched: env_or("FEED_CAP_WATCHED", 1),
            cap_cat_top: env_or("FEED_CAP_CAT_TOP", 3),
            cap_cat_rising: env_or("FEED_CAP_CAT_RISING", 3),
            cap_cat_extra: env_or("FEED_CAP_CAT_EXTRA", 3),
            cap_creator_top: env_or("FEED_CAP_CREATOR_TOP", 2),
            cap_creator_rising: env_or("FEED_CAP_CREATOR_RISING", 2),
            cap_creator_extra: env_or("FEED_CAP_CREATOR_EXTRA", 2),
            cap_creator_followed: env_or("FEED_CAP_CREATOR_FOLLOWED", 2),
            cap_trending: env_or("FEED_CAP_TRENDING", 2),
            cap_rising: env_or("FEED_CAP_RISING", 1),
            cap_recent: env_or("FEED_CAP_RECENT", 1),
            cap_evergreen: env_or("FEED_CAP_EVERGREEN", 1),
            cap_unknown: env_or("FEED_CAP_UNKNOWN", 1),
        };

        Ok(Config {
            app: AppConfig {
                env: env_or_str("APP_ENV", "development"),
                port: env_or("APP_PORT", 8000),
                log_level: env_or_str("LOG_LEVEL", "info"),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            redis: RedisConfig {
                url: env_or_str("REDIS_URL", "redis://127.0.0.1:6379"),
            },
            kafka: KafkaConfig {
                bootstrap_servers: env_or_str("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
                engagement_topic: env_or_str("KAFKA_ENGAGEMENT_TOPIC", "engagement-events"),
                score_topic: env_or_str("KAFKA_SCORE_TOPIC", "post-score-events"),
                stats_group: env_or_str("KAFKA_STATS_GROUP", "engagement-stats"),
                aggregator_group: env_or_str("KAFKA_AGGREGATOR_GROUP", "hourly-aggregator"),
            },
            scoring,
            pools,
            feed,
            session: SessionConfig {
                ttl_seconds: env_or("SESSION_TTL_SECONDS", 600),
                expiry_tick_seconds: env_or("SESSION_EXPIRY_TICK_SECONDS", 60),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.half_life_days, 0.5);
        assert_eq!(scoring.hard_skip_threshold, 10);
        assert_eq!(scoring.reentry_delay_ms, 604_800_000);
        assert_eq!(scoring.weight_share, 5.0);

        let pools = PoolCaps::default();
        assert_eq!(pools.top_categories, 20);
        assert_eq!(pools.rising_categories, 12);
        assert_eq!(pools.top_creators, 50);
        assert_eq!(pools.rising_creators, 25);

        let feed = FeedConfig::default();
        assert_eq!(feed.feed_size, 20);
        assert_eq!(feed.non_explore, 15);
    }

    #[test]
    fn test_session_ttl_ms() {
        let session = SessionConfig::default();
        assert_eq!(session.ttl_ms(), 600_000);
    }
}
