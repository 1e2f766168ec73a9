//! Session merge-back: blend a fast-moving session profile into the
//! persistent long-term profile on expiry or logout.
//!
//! Interest trees blend level by level; creators are first collapsed into a
//! priority map (followed > positive > watched > skipped, first wins) and
//! then re-placed through the skip-path transition rules with the blended
//! skip count as arbiter.

use std::collections::HashSet;
use uuid::Uuid;

use crate::config::{PoolCaps, ScoringConfig};
use crate::models::{
    CategoryNode, CoolOffEntry, CreatorNode, ProfileState, SpecificNode, SubNode,
};
use crate::pools;
use crate::scoring::ema_blend;

/// Session-side creator observation, collapsed by pool priority.
#[derive(Debug, Clone, Copy)]
struct CreatorObservation {
    score: f64,
    skips: u32,
    reentry_at: Option<i64>,
}

pub fn merge_session_into_profile(
    profile: &mut ProfileState,
    session: &ProfileState,
    scoring: &ScoringConfig,
    caps: &PoolCaps,
    now_ms: i64,
) {
    let alpha = scoring.session_blend_alpha;

    for session_cat in session
        .top_interests
        .iter()
        .chain(session.rising_interests.iter())
    {
        merge_category(profile, session_cat, alpha, caps, now_ms);
    }

    merge_creators(profile, session, scoring, caps, now_ms);
}

fn merge_category(
    profile: &mut ProfileState,
    session_cat: &CategoryNode,
    alpha: f64,
    caps: &PoolCaps,
    now_ms: i64,
) {
    let mut cat = pools::take_node(
        &mut profile.top_interests,
        &mut profile.rising_interests,
        &session_cat.name,
    )
    .unwrap_or_else(|| CategoryNode::new(&session_cat.name, now_ms));

    cat.score = ema_blend(alpha, cat.score, session_cat.score);
    cat.last_updated = now_ms;

    for session_sub in session_cat
        .top_subs
        .iter()
        .chain(session_cat.rising_subs.iter())
    {
        let mut sub = pools::take_node(&mut cat.top_subs, &mut cat.rising_subs, &session_sub.name)
            .unwrap_or_else(|| SubNode::new(&session_sub.name, now_ms));
        sub.score = ema_blend(alpha, sub.score, session_sub.score);
        sub.last_updated = now_ms;

        for session_spec in &session_sub.specific {
            let mut spec = pools::take_from_pool(&mut sub.specific, &session_spec.name)
                .unwrap_or_else(|| SpecificNode::new(&session_spec.name, now_ms));
            spec.score = ema_blend(alpha, spec.score, session_spec.score);
            spec.last_updated = now_ms;
            pools::insert_into_pool(&mut sub.specific, caps.specifics, spec);
        }

        pools::insert_into_pools(
            &mut cat.top_subs,
            &mut cat.rising_subs,
            caps.top_subs,
            caps.rising_subs,
            sub,
        );
    }

    pools::insert_into_pools(
        &mut profile.top_interests,
        &mut profile.rising_interests,
        caps.top_categories,
        caps.rising_categories,
        cat,
    );
}

/// Collapse the session's creator pools into one observation per creator.
fn session_creator_observations(session: &ProfileState) -> Vec<(Uuid, CreatorObservation)> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut observations = Vec::new();

    let mut push = |id: Uuid, obs: CreatorObservation, seen: &mut HashSet<Uuid>| {
        if seen.insert(id) {
            observations.push((id, obs));
        }
    };

    for f in &session.following {
        push(
            f.user_id,
            CreatorObservation {
                score: f.score,
                skips: f.skips,
                reentry_at: f.reentry_at,
            },
            &mut seen,
        );
    }
    for c in session
        .creators
        .top_creators
        .iter()
        .chain(session.creators.rising_creators.iter())
    {
        push(
            c.creator_id,
            CreatorObservation {
                score: c.score,
                skips: c.skips,
                reentry_at: None,
            },
            &mut seen,
        );
    }
    for w in &session.creators.watched_creators_pool {
        push(
            w.creator_id,
            CreatorObservation {
                score: 0.0,
                skips: w.skips,
                reentry_at: Some(w.reentry_at),
            },
            &mut seen,
        );
    }
    for s in &session.creators.skipped_creators_pool {
        push(
            s.creator_id,
            CreatorObservation {
                score: 0.0,
                skips: s.skips,
                reentry_at: Some(s.reentry_at),
            },
            &mut seen,
        );
    }
    observations
}

fn merge_creators(
    profile: &mut ProfileState,
    session: &ProfileState,
    scoring: &ScoringConfig,
    caps: &PoolCaps,
    now_ms: i64,
) {
    let alpha = scoring.session_blend_alpha;
    let threshold = scoring.hard_skip_threshold;

    for (creator_id, observed) in session_creator_observations(session) {
        // FOLLOWED in the persistent profile: blend in place, never demote.
        if let Some(followed) = profile
            .following
            .iter_mut()
            .find(|f| f.user_id == creator_id)
        {
            let new_skips =
                ema_blend(alpha, followed.skips as f64, observed.skips as f64).round() as u32;
            followed.score = ema_blend(alpha, followed.score, observed.score);
            followed.skips = new_skips;
            followed.last_updated = now_ms;
            if new_skips >= threshold {
                followed.score = 0.0;
                followed.reentry_at = Some(
                    observed
                        .reentry_at
                        .unwrap_or(now_ms + scoring.reentry_delay_ms),
                );
            }
            continue;
        }

        let creators = &mut profile.creators;

        let was_skipped = creators
            .skipped_creators_pool
            .iter()
            .position(|e| e.creator_id == creator_id);
        let was_watched = creators
            .watched_creators_pool
            .iter()
            .position(|e| e.creator_id == creator_id);

        let (old_score, old_skips, old_reentry) = if let Some(node) = pools::take_node(
            &mut creators.top_creators,
            &mut creators.rising_creators,
            &creator_id,
        ) {
            (node.score, node.skips, None)
        } else if let Some(idx) = was_watched {
            let entry = creators.watched_creators_pool.remove(idx);
            (0.0, entry.skips, Some(entry.reentry_at))
        } else if let Some(idx) = was_skipped {
            let entry = creators.skipped_creators_pool.remove(idx);
            (0.0, entry.skips, Some(entry.reentry_at))
        } else {
            (0.0, 0, None)
        };

        let new_skips = ema_blend(alpha, old_skips as f64, observed.skips as f64).round() as u32;
        let new_score = ema_blend(alpha, old_score, observed.score);

        if new_skips >= threshold {
            // Keep an existing ban window; only a fresh transition starts one.
            let reentry_at = old_reentry
                .filter(|_| was_skipped.is_some())
                .or(observed.reentry_at)
                .unwrap_or(now_ms + scoring.reentry_delay_ms);
            creators.skipped_creators_pool.push(CoolOffEntry {
                creator_id,
                skips: new_skips,
                last_skip_update: now_ms,
                reentry_at,
            });
        } else if new_skips >= scoring.watched_threshold {
            let reentry_at = old_reentry.or(observed.reentry_at).unwrap_or(now_ms);
            creators.watched_creators_pool.push(CoolOffEntry {
                creator_id,
                skips: new_skips,
                last_skip_update: now_ms,
                reentry_at,
            });
        } else if new_score > 0.0 {
            let mut node = CreatorNode::new(creator_id, now_ms);
            node.score = new_score;
            node.skips = new_skips;
            pools::insert_into_pools(
                &mut creators.top_creators,
                &mut creators.rising_creators,
                caps.top_creators,
                caps.rising_creators,
                node,
            );
        }
        // Otherwise the creator drops back to absent.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreatorsInterests, FollowedCreator};

    fn scoring() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn caps() -> PoolCaps {
        PoolCaps::default()
    }

    fn category(name: &str, score: f64) -> CategoryNode {
        let mut c = CategoryNode::new(name, 0);
        c.score = score;
        c
    }

    #[test]
    fn test_merge_identical_scores_is_fixed_point() {
        // Session started and expired with no writes: the mirror equals the
        // profile, so every blended score is unchanged.
        let mut profile = ProfileState::default();
        profile.top_interests.push(category("Tech", 0.5));
        let mut cat = category("Music", 0.3);
        cat.top_subs.push(SubNode {
            name: "Jazz".to_string(),
            score: 0.2,
            last_updated: 0,
            specific: vec![],
        });
        profile.top_interests.push(cat);

        let session = profile.clone();
        let mut merged = profile.clone();
        merge_session_into_profile(&mut merged, &session, &scoring(), &caps(), 10_000);

        for name in ["Tech", "Music"] {
            let before = profile.category(name).unwrap().score;
            let after = merged.category(name).unwrap().score;
            assert!((before - after).abs() < 1e-12, "score drifted for {}", name);
        }
        let sub_after = &merged.category("Music").unwrap().top_subs[0];
        assert!((sub_after.score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_merge_pulls_profile_toward_session() {
        let mut profile = ProfileState::default();
        profile.top_interests.push(category("Tech", 0.4));

        let mut session = ProfileState::default();
        session.top_interests.push(category("Tech", 2.0));

        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
        let merged = profile.category("Tech").unwrap().score;
        // (1 - 0.25) * 0.4 + 0.25 * 2.0
        assert!((merged - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_merge_creates_new_categories() {
        let mut profile = ProfileState::default();
        let mut session = ProfileState::default();
        session.top_interests.push(category("Gaming", 1.0));

        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
        let merged = profile.category("Gaming").unwrap();
        // Fresh node blends against a zero old score.
        assert!((merged.score - 0.25).abs() < 1e-12);
        assert_eq!(merged.last_updated, 10_000);
    }

    #[test]
    fn test_merge_creator_priority_followed_wins() {
        let creator = Uuid::new_v4();
        let mut profile = ProfileState::default();
        profile.following.push(FollowedCreator::new(creator, 0));

        let mut session = ProfileState::default();
        let mut followed = FollowedCreator::new(creator, 0);
        followed.score = 4.0;
        session.following.push(followed);
        // The same creator also lingers in the session's watched pool; the
        // followed observation must win.
        session.creators.watched_creators_pool.push(CoolOffEntry {
            creator_id: creator,
            skips: 5,
            last_skip_update: 0,
            reentry_at: 0,
        });

        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
        assert_eq!(profile.following.len(), 1);
        assert!((profile.following[0].score - 1.0).abs() < 1e-12);
        assert_eq!(profile.following[0].skips, 0);
        assert!(profile.creators.watched_creators_pool.is_empty());
    }

    #[test]
    fn test_merge_blended_skips_demote_to_watched() {
        let creator = Uuid::new_v4();
        let mut profile = ProfileState::default();
        let mut node = CreatorNode::new(creator, 0);
        node.score = 1.0;
        profile.creators.top_creators.push(node);

        let mut session = ProfileState::default();
        session.creators.watched_creators_pool.push(CoolOffEntry {
            creator_id: creator,
            skips: 8,
            last_skip_update: 0,
            reentry_at: 5_000,
        });

        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
        // round(0.75*0 + 0.25*8) = 2 -> watched tier.
        assert!(profile.creators.top_creators.is_empty());
        assert_eq!(profile.creators.watched_creators_pool.len(), 1);
        assert_eq!(profile.creators.watched_creators_pool[0].skips, 2);
    }

    #[test]
    fn test_merge_hard_skipped_session_keeps_ban() {
        let creator = Uuid::new_v4();
        let mut profile = ProfileState::default();
        profile.creators.skipped_creators_pool.push(CoolOffEntry {
            creator_id: creator,
            skips: 10,
            last_skip_update: 0,
            reentry_at: 99_000,
        });

        let session = profile.clone();
        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);

        let entry = &profile.creators.skipped_creators_pool[0];
        assert_eq!(entry.skips, 10);
        // An idle round-trip must not extend the existing ban window.
        assert_eq!(entry.reentry_at, 99_000);
    }

    #[test]
    fn test_merge_positive_round_trip_preserves_score() {
        let creator = Uuid::new_v4();
        let mut profile = ProfileState::default();
        let mut node = CreatorNode::new(creator, 0);
        node.score = 1.25;
        profile.creators = CreatorsInterests {
            top_creators: vec![node],
            ..Default::default()
        };

        let session = profile.clone();
        merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
        assert_eq!(profile.creators.top_creators.len(), 1);
        assert!((profile.creators.top_creators[0].score - 1.25).abs() < 1e-12);
    }
}
