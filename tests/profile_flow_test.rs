//! End-to-end profile flows driven through the pure scoring layer: the
//! engagement path, the creator state machine, and the session round trip.

use pulsefeed::config::{PoolCaps, ScoringConfig};
use pulsefeed::models::{ProfileState, SessionProfile};
use pulsefeed::services::creator::{apply_creator_signal, CreatorSignal};
use pulsefeed::services::interest::{apply_interest_scores, apply_interest_skip, LevelScores};
use pulsefeed::services::merge::merge_session_into_profile;
use uuid::Uuid;

const SESSION_ALPHA: f64 = 0.7;

fn scoring() -> ScoringConfig {
    ScoringConfig::default()
}

fn caps() -> PoolCaps {
    PoolCaps::default()
}

fn engage_post(
    state: &mut ProfileState,
    category: &str,
    sub: &str,
    creator: Uuid,
    weight: f64,
    now_ms: i64,
) {
    apply_interest_scores(
        state,
        category,
        Some(sub),
        None,
        LevelScores {
            category: weight,
            sub: Some(weight),
            specific: None,
        },
        &caps(),
        SESSION_ALPHA,
        scoring().half_life_days,
        now_ms,
    );
    apply_creator_signal(
        state,
        creator,
        CreatorSignal::Engage(weight),
        &scoring(),
        &caps(),
        SESSION_ALPHA,
        now_ms,
    );
}

#[test]
fn cold_user_first_engagement_builds_profile() {
    let mut state = ProfileState::default();
    let creator = Uuid::new_v4();

    // viewed + liked = 0.5 + 1.0
    engage_post(&mut state, "Tech", "AI", creator, 1.5, 1_000);

    assert_eq!(state.top_interests.len(), 1);
    let cat = &state.top_interests[0];
    assert_eq!(cat.name, "Tech");
    assert!(cat.score > 0.0);
    assert_eq!(cat.top_subs[0].name, "AI");

    assert_eq!(state.creators.top_creators.len(), 1);
    let node = &state.creators.top_creators[0];
    assert_eq!(node.creator_id, creator);
    assert!(node.score > 0.0);
    assert_eq!(node.skips, 0);
}

#[test]
fn pool_invariants_hold_under_mixed_traffic() {
    let mut state = ProfileState::default();
    let creators: Vec<Uuid> = (0..60).map(|_| Uuid::new_v4()).collect();
    let pool_caps = caps();

    let mut now = 1_000;
    for (i, creator) in creators.iter().enumerate() {
        let category = format!("cat{}", i % 30);
        engage_post(&mut state, &category, "general", *creator, 1.0 + i as f64 * 0.05, now);
        now += 1_000;
        if i % 7 == 0 {
            apply_interest_skip(
                &mut state,
                &category,
                None,
                None,
                scoring().skip_weight,
                &pool_caps,
                SESSION_ALPHA,
                scoring().half_life_days,
                now,
            );
            now += 1_000;
        }
    }

    assert!(state.top_interests.len() <= pool_caps.top_categories);
    assert!(state.rising_interests.len() <= pool_caps.rising_categories);
    assert!(state.creators.top_creators.len() <= pool_caps.top_creators);
    assert!(state.creators.rising_creators.len() <= pool_caps.rising_creators);

    // No category appears in both interest pools.
    for cat in &state.top_interests {
        assert!(
            state.rising_interests.iter().all(|r| r.name != cat.name),
            "{} present in both pools",
            cat.name
        );
    }
    // A creator lives in at most one non-following pool.
    for node in &state.creators.top_creators {
        assert!(state
            .creators
            .rising_creators
            .iter()
            .all(|r| r.creator_id != node.creator_id));
        assert!(state
            .creators
            .watched_creators_pool
            .iter()
            .all(|w| w.creator_id != node.creator_id));
        assert!(state
            .creators
            .skipped_creators_pool
            .iter()
            .all(|s| s.creator_id != node.creator_id));
    }
}

#[test]
fn hard_skipped_pool_entries_sit_at_threshold() {
    let mut state = ProfileState::default();
    let cfg = scoring();
    let creator = Uuid::new_v4();

    let mut now = 1_000;
    for _ in 0..15 {
        apply_creator_signal(
            &mut state,
            creator,
            CreatorSignal::Skip,
            &cfg,
            &caps(),
            SESSION_ALPHA,
            now,
        );
        now += 1_000;
    }

    let entry = &state.creators.skipped_creators_pool[0];
    // Skips cap at the threshold even under sustained skipping.
    assert_eq!(entry.skips, cfg.hard_skip_threshold);
}

#[test]
fn session_blob_round_trip_then_merge_is_lossless() {
    let user_id = Uuid::new_v4();
    let creator = Uuid::new_v4();

    let mut profile = ProfileState::default();
    engage_post(&mut profile, "Tech", "AI", creator, 2.0, 1_000);
    engage_post(&mut profile, "Music", "Jazz", Uuid::new_v4(), 1.0, 2_000);

    // Session start: project, serialize to the wire blob, read back.
    let blob = SessionProfile::from_state(user_id, profile.clone());
    let json = serde_json::to_string(&blob).unwrap();
    let restored: SessionProfile = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.user_id, user_id);

    // Expiry with no intervening writes: merge-back leaves scores unchanged.
    let mut merged = profile.clone();
    merge_session_into_profile(
        &mut merged,
        &restored.into_state(),
        &scoring(),
        &caps(),
        10_000,
    );

    for cat in &profile.top_interests {
        let after = merged.category(&cat.name).expect("category survived");
        assert!(
            (after.score - cat.score).abs() < 1e-9,
            "category {} drifted: {} -> {}",
            cat.name,
            cat.score,
            after.score
        );
    }
    let creator_before = profile
        .creators
        .top_creators
        .iter()
        .find(|c| c.creator_id == creator)
        .unwrap();
    let creator_after = merged
        .creators
        .top_creators
        .iter()
        .find(|c| c.creator_id == creator)
        .unwrap();
    assert!((creator_after.score - creator_before.score).abs() < 1e-9);
}

#[test]
fn active_session_merge_pulls_profile_forward() {
    let creator = Uuid::new_v4();

    let mut profile = ProfileState::default();
    engage_post(&mut profile, "Tech", "AI", creator, 1.0, 1_000);
    let profile_score = profile.top_interests[0].score;

    // The session sees heavy engagement the profile has not.
    let mut session = profile.clone();
    for i in 0..5 {
        engage_post(&mut session, "Tech", "AI", creator, 3.0, 2_000 + i * 1_000);
    }
    let session_score = session.top_interests[0].score;
    assert!(session_score > profile_score);

    merge_session_into_profile(&mut profile, &session, &scoring(), &caps(), 10_000);
    let merged_score = profile.top_interests[0].score;

    // Blended strictly between the two, nearer the profile (alpha = 0.25).
    assert!(merged_score > profile_score);
    assert!(merged_score < session_score);
}
