//! Feed assembly: build pools, select candidates, batch fetch, score,
//! interleave, pad with exploration.

pub mod candidates;
pub mod interleave;

pub use candidates::{Bucket, CandidateSelection};
pub use interleave::ScoredCandidate;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{PostRepo, ProfileRepo, StatsRepo};
use crate::error::{AppError, Result};
use crate::models::{EntityType, FeedPost, Post, ProfileState, StatCounters};
use crate::scoring;
use crate::session::SessionStore;
use crate::util::now_ms;

const CATEGORY_TOP_FETCH: i64 = 5;
const CATEGORY_RANDOM_FETCH: i64 = 3;
const CREATOR_TOP_FETCH: i64 = 20;
const CREATOR_RANDOM_FETCH: i64 = 10;
const RISING_FETCH: (i64, i64) = (4, 2);
const TRENDING_FETCH: (i64, i64) = (8, 4);
const RECENT_FETCH: (i64, i64) = (8, 4);
const EVERGREEN_FETCH: (i64, i64) = (8, 4);

pub struct FeedService {
    posts: Arc<PostRepo>,
    profiles: Arc<ProfileRepo>,
    stats: Arc<StatsRepo>,
    sessions: SessionStore,
    config: Arc<Config>,
}

impl FeedService {
    pub fn new(
        posts: Arc<PostRepo>,
        profiles: Arc<ProfileRepo>,
        stats: Arc<StatsRepo>,
        sessions: SessionStore,
        config: Arc<Config>,
    ) -> Self {
        Self {
            posts,
            profiles,
            stats,
            sessions,
            config,
        }
    }

    pub async fn build_feed(
        &self,
        user_id: Uuid,
        session_id: Option<&str>,
    ) -> Result<Vec<FeedPost>> {
        let now = now_ms();

        // Prefer the session mirror when one is live; the persistent doc
        // still supplies the seen-post filter.
        let persistent = self
            .profiles
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        let seen: Vec<Uuid> = persistent.seen_posts.iter().copied().collect();

        let state = match session_id {
            Some(sid) => match self.sessions.get_session(sid).await {
                Ok(Some(blob)) if blob.user_id == user_id => blob.into_state(),
                _ => persistent.state,
            },
            None => persistent.state,
        };

        let mut rng = StdRng::from_entropy();
        let selection = candidates::select_candidates(
            &state,
            now,
            self.config.feed.skip_reentry_prob,
            self.config.feed.watched_prob,
            &mut rng,
        );

        let candidates = self.fetch_candidates(&state, &selection, &seen).await?;
        debug!(
            user_id = %user_id,
            candidates = candidates.len(),
            "Feed candidates fetched"
        );

        let scored = self.score_candidates(&state, candidates, now).await?;
        let picked = interleave::interleave(&scored, &self.config.feed, self.config.feed.non_explore);

        let mut feed: Vec<ScoredCandidate> = picked
            .into_iter()
            .map(|idx| scored[idx].clone())
            .collect();

        // Exploration padding up to the full feed size.
        if feed.len() < self.config.feed.feed_size {
            let mut exclude: Vec<Uuid> = seen.clone();
            exclude.extend(feed.iter().map(|c| c.post.id));
            let padding = self
                .posts
                .sample_random_unseen(
                    &exclude,
                    (self.config.feed.feed_size - feed.len()) as i64,
                )
                .await?;
            let mut picked_ids: HashSet<Uuid> = feed.iter().map(|c| c.post.id).collect();
            for post in padding {
                if feed.len() >= self.config.feed.feed_size {
                    break;
                }
                if picked_ids.insert(post.id) {
                    feed.push(ScoredCandidate {
                        post,
                        bucket: Bucket::Explore,
                        overall_score: 0.0,
                    });
                }
            }
        }

        info!(user_id = %user_id, posts = feed.len(), "Feed assembled");

        Ok(feed
            .into_iter()
            .map(|c| FeedPost {
                id: c.post.id,
                creator: c.post.creator,
                category: c.post.category,
                sub_category: c.post.sub_category,
                bucket: c.bucket.as_str().to_string(),
                overall_score: c.overall_score,
                trending_score: c.post.trending_score,
                bayesian_score: c.post.bayesian_score,
                is_rising: c.post.is_rising,
                is_evergreen: c.post.is_evergreen,
                created_at: c.post.created_at,
            })
            .collect())
    }

    /// Batch fetch across the selected buckets, first occurrence of a post
    /// wins its bucket assignment.
    async fn fetch_candidates(
        &self,
        state: &ProfileState,
        selection: &CandidateSelection,
        seen: &[Uuid],
    ) -> Result<Vec<(Post, Bucket)>> {
        let mut out: Vec<(Post, Bucket)> = Vec::new();
        let mut taken: HashSet<Uuid> = HashSet::new();

        // Skipped creators are excluded everywhere except their own
        // re-entry pick.
        let reentry_pick: Option<Uuid> = selection
            .creators
            .iter()
            .find(|(_, b)| *b == Bucket::SkipReentry)
            .map(|(id, _)| *id);
        let excluded: Vec<Uuid> = state
            .creators
            .skipped_creators_pool
            .iter()
            .map(|e| e.creator_id)
            .filter(|id| Some(*id) != reentry_pick)
            .collect();

        fn push(
            posts: Vec<Post>,
            bucket_of: &dyn Fn(&Post) -> Bucket,
            out: &mut Vec<(Post, Bucket)>,
            taken: &mut HashSet<Uuid>,
        ) {
            for post in posts {
                if taken.insert(post.id) {
                    let bucket = bucket_of(&post);
                    out.push((post, bucket));
                }
            }
        }

        for category in &selection.categories {
            let posts = self
                .posts
                .sample_by_category(
                    &category.name,
                    &category.sub_categories,
                    &excluded,
                    seen,
                    CATEGORY_TOP_FETCH,
                    CATEGORY_RANDOM_FETCH,
                )
                .await?;
            let bucket = category.bucket;
            push(posts, &|_| bucket, &mut out, &mut taken);
        }

        let creator_ids = selection.creator_ids();
        if !creator_ids.is_empty() {
            let posts = self
                .posts
                .sample_by_creators(
                    &creator_ids,
                    &excluded,
                    seen,
                    CREATOR_TOP_FETCH,
                    CREATOR_RANDOM_FETCH,
                )
                .await?;
            push(
                posts,
                &|post| {
                    selection
                        .creator_bucket(post.creator)
                        .unwrap_or(Bucket::Unknown)
                },
                &mut out,
                &mut taken,
            );
        }

        let rising = self
            .posts
            .sample_rising(seen, RISING_FETCH.0, RISING_FETCH.1)
            .await?;
        push(rising, &|_| Bucket::Rising, &mut out, &mut taken);

        let trending = self
            .posts
            .sample_trending(seen, TRENDING_FETCH.0, TRENDING_FETCH.1)
            .await?;
        push(trending, &|_| Bucket::Trending, &mut out, &mut taken);

        let since = chrono::Utc::now()
            - chrono::Duration::milliseconds(self.config.feed.recent_window_ms);
        let recent = self
            .posts
            .sample_recent(seen, since, RECENT_FETCH.0, RECENT_FETCH.1)
            .await?;
        push(recent, &|_| Bucket::Recent, &mut out, &mut taken);

        let evergreen = self
            .posts
            .sample_evergreen(seen, EVERGREEN_FETCH.0, EVERGREEN_FETCH.1)
            .await?;
        push(evergreen, &|_| Bucket::Evergreen, &mut out, &mut taken);

        Ok(out)
    }

    async fn score_candidates(
        &self,
        state: &ProfileState,
        fetched: Vec<(Post, Bucket)>,
        now_ms: i64,
    ) -> Result<Vec<ScoredCandidate>> {
        let categories: Vec<String> = fetched
            .iter()
            .map(|(p, _)| p.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let creators: Vec<Uuid> = fetched
            .iter()
            .map(|(p, _)| p.creator)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let category_stats = self
            .stats
            .globals_by_name(EntityType::Category, &categories)
            .await?;
        let creator_stats = self.stats.creators_by_id(&creators).await?;

        Ok(fetched
            .into_iter()
            .map(|(post, bucket)| {
                let overall_score = score_post(
                    &post,
                    state,
                    &category_stats,
                    &creator_stats,
                    &self.config.feed,
                    self.config.scoring.half_life_days,
                    now_ms,
                );
                ScoredCandidate {
                    post,
                    bucket,
                    overall_score,
                }
            })
            .collect())
    }
}

/// Composite score: personal affinity with time decay plus raw, trending
/// and Bayesian components.
pub fn score_post(
    post: &Post,
    state: &ProfileState,
    category_stats: &HashMap<String, StatCounters>,
    creator_stats: &HashMap<Uuid, StatCounters>,
    feed: &crate::config::FeedConfig,
    half_life_days: f64,
    now_ms: i64,
) -> f64 {
    let category_avg = category_stats
        .get(&post.category)
        .map(|s| s.avg())
        .unwrap_or(0.0);
    let creator_avg = creator_stats
        .get(&post.creator)
        .map(|s| s.avg())
        .unwrap_or(0.0);

    let interest_score = state
        .category(&post.category)
        .map(|c| c.score)
        .filter(|s| *s != 0.0)
        .unwrap_or(feed.cold_start_factor * category_avg);
    let creator_score = state
        .creator_score(post.creator)
        .filter(|s| *s != 0.0)
        .unwrap_or(feed.cold_start_factor * creator_avg);

    let age_days = (now_ms - post.created_at.timestamp_millis()).max(0) as f64 / scoring::MS_PER_DAY;
    let time_decay = (-std::f64::consts::LN_2 / half_life_days * age_days).exp();

    feed.personal_weight
        * time_decay
        * (feed.interest_weight * interest_score + feed.creator_weight * creator_score)
        + feed.raw_weight * post.raw_score
        + feed.trend_weight * post.trending_score
        + feed.bayesian_weight * post.bayesian_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::models::CategoryNode;
    use chrono::Utc;

    fn post(category: &str, raw: f64, trending: f64, bayesian: f64) -> Post {
        let now = Utc::now();
        Post {
            id: Uuid::new_v4(),
            creator: Uuid::new_v4(),
            category: category.to_string(),
            sub_category: "general".to_string(),
            specific: None,
            impression_count: 0,
            engagement_sum: 0.0,
            raw_score: raw,
            trending_score: trending,
            short_term_velocity_ema: 0.0,
            historical_velocity_ema: 0.0,
            bayesian_score: bayesian,
            cumulative_score: 0.0,
            is_evergreen: false,
            is_rising: false,
            window_events: vec![],
            created_at: now,
            last_trending_update: now,
            last_score_update: now,
        }
    }

    #[test]
    fn test_score_prefers_profile_match() {
        let mut state = ProfileState::default();
        let mut cat = CategoryNode::new("Tech", 0);
        cat.score = 2.0;
        state.top_interests.push(cat);

        let feed = FeedConfig::default();
        let now = Utc::now().timestamp_millis();
        let matched = score_post(
            &post("Tech", 0.0, 0.0, 0.0),
            &state,
            &HashMap::new(),
            &HashMap::new(),
            &feed,
            0.5,
            now,
        );
        let unmatched = score_post(
            &post("Sports", 0.0, 0.0, 0.0),
            &state,
            &HashMap::new(),
            &HashMap::new(),
            &feed,
            0.5,
            now,
        );
        assert!(matched > unmatched);
        // 0.5 * decay(~0) * 0.7 * 2.0
        assert!((matched - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_cold_start_falls_back_to_population_average() {
        let state = ProfileState::default();
        let mut category_stats = HashMap::new();
        category_stats.insert(
            "Tech".to_string(),
            StatCounters {
                impression_count: 100,
                total_engagement: 200.0,
            },
        );

        let feed = FeedConfig::default();
        let now = Utc::now().timestamp_millis();
        let score = score_post(
            &post("Tech", 0.0, 0.0, 0.0),
            &state,
            &category_stats,
            &HashMap::new(),
            &feed,
            0.5,
            now,
        );
        // interest falls back to 0.1 * 2.0
        assert!((score - 0.5 * 0.7 * 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_raw_trend_bayesian_components() {
        let state = ProfileState::default();
        let feed = FeedConfig::default();
        let now = Utc::now().timestamp_millis();
        let score = score_post(
            &post("Tech", 4.0, 2.0, 1.0),
            &state,
            &HashMap::new(),
            &HashMap::new(),
            &feed,
            0.5,
            now,
        );
        // 0.25*4 + 0.25*2 + 0.15*1
        assert!((score - 1.65).abs() < 1e-9);
    }
}
