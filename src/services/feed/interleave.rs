//! Fair-share interleaving: each pick comes from the least-used eligible
//! bucket, breaking ties by score, then bucket order, then insertion order.

use std::collections::HashMap;

use super::candidates::Bucket;
use crate::config::FeedConfig;
use crate::models::Post;

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub post: Post,
    pub bucket: Bucket,
    pub overall_score: f64,
}

/// Pick up to `target` candidates honoring per-bucket caps.
pub fn interleave(
    candidates: &[ScoredCandidate],
    feed: &FeedConfig,
    target: usize,
) -> Vec<usize> {
    let mut usage: HashMap<Bucket, usize> = HashMap::new();
    let mut picked: Vec<usize> = Vec::new();
    let mut taken = vec![false; candidates.len()];

    while picked.len() < target {
        // Buckets still under cap, with their current usage.
        let mut min_usage: Option<usize> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            if taken[idx] {
                continue;
            }
            let used = *usage.get(&candidate.bucket).unwrap_or(&0);
            if used >= candidate.bucket.cap(feed) {
                continue;
            }
            min_usage = Some(match min_usage {
                Some(m) => m.min(used),
                None => used,
            });
        }
        let Some(min_usage) = min_usage else {
            break;
        };

        // Among candidates whose bucket sits at the minimum usage, take the
        // highest-scored; ties resolve by bucket order then insertion order.
        let mut best: Option<usize> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            if taken[idx] {
                continue;
            }
            let used = *usage.get(&candidate.bucket).unwrap_or(&0);
            if used >= candidate.bucket.cap(feed) || used != min_usage {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(current) => {
                    let cur = &candidates[current];
                    let better = candidate.overall_score > cur.overall_score
                        || (candidate.overall_score == cur.overall_score
                            && candidate.bucket < cur.bucket);
                    if better {
                        Some(idx)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let Some(winner) = best else {
            break;
        };
        taken[winner] = true;
        *usage.entry(candidates[winner].bucket).or_insert(0) += 1;
        picked.push(winner);
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn candidate(bucket: Bucket, score: f64) -> ScoredCandidate {
        let now = Utc::now();
        ScoredCandidate {
            post: Post {
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
                window_events: vec![],
                created_at: now,
                last_trending_update: now,
                last_score_update: now,
            },
            bucket,
            overall_score: score,
        }
    }

    fn feed() -> FeedConfig {
        FeedConfig::default()
    }

    #[test]
    fn test_bucket_caps_respected() {
        let mut candidates = Vec::new();
        for i in 0..10 {
            candidates.push(candidate(Bucket::Trending, 10.0 - i as f64));
        }
        for i in 0..10 {
            candidates.push(candidate(Bucket::CatTop, 5.0 - i as f64));
        }

        let picked = interleave(&candidates, &feed(), 15);
        let trending = picked
            .iter()
            .filter(|&&i| candidates[i].bucket == Bucket::Trending)
            .count();
        let cat_top = picked
            .iter()
            .filter(|&&i| candidates[i].bucket == Bucket::CatTop)
            .count();
        assert!(trending <= feed().cap_trending);
        assert!(cat_top <= feed().cap_cat_top);
        // Caps 2 + 3 bound the total despite 20 candidates.
        assert_eq!(picked.len(), 5);
    }

    #[test]
    fn test_fair_share_rotates_buckets() {
        let candidates = vec![
            candidate(Bucket::CatTop, 9.0),
            candidate(Bucket::CatTop, 8.0),
            candidate(Bucket::Trending, 1.0),
        ];
        let picked = interleave(&candidates, &feed(), 3);
        // After one CatTop pick, Trending sits at usage 0 while CatTop is at
        // 1, so the low-scored Trending candidate goes second.
        assert_eq!(picked[0], 0);
        assert_eq!(picked[1], 2);
        assert_eq!(picked[2], 1);
    }

    #[test]
    fn test_score_tie_breaks_by_bucket_order() {
        let candidates = vec![
            candidate(Bucket::Trending, 1.0),
            candidate(Bucket::SkipReentry, 1.0),
        ];
        let picked = interleave(&candidates, &feed(), 1);
        // SKIP_REENTRY precedes TRENDING in the cap ordering.
        assert_eq!(picked[0], 1);
    }

    #[test]
    fn test_equal_everything_uses_insertion_order() {
        let candidates = vec![
            candidate(Bucket::Recent, 1.0),
            candidate(Bucket::Recent, 1.0),
        ];
        let picked = interleave(&candidates, &feed(), 2);
        // Cap 1 on RECENT: only the first is taken.
        assert_eq!(picked, vec![0]);
    }

    #[test]
    fn test_no_duplicates_and_bounded_output() {
        let mut candidates = Vec::new();
        for bucket in [
            Bucket::CatTop,
            Bucket::CatRising,
            Bucket::CreatorTop,
            Bucket::Trending,
            Bucket::Rising,
            Bucket::Recent,
            Bucket::Evergreen,
        ] {
            for i in 0..4 {
                candidates.push(candidate(bucket, i as f64));
            }
        }
        let picked = interleave(&candidates, &feed(), 15);
        assert!(picked.len() <= 15);
        let mut unique = picked.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), picked.len());
    }
}
