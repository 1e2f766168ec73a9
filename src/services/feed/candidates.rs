//! Candidate sourcing: which categories and creators feed the batch fetch,
//! and which bucket each one is accountable to.

use rand::Rng;
use uuid::Uuid;

use crate::models::{CategoryNode, ProfileState};

const CAT_TOP_COUNT: usize = 3;
const CAT_RISING_COUNT: usize = 2;
const CREATOR_TOP_COUNT: usize = 4;
const CREATOR_RISING_COUNT: usize = 2;
const FOLLOWED_TOP_COUNT: usize = 3;
const FOLLOWED_RANDOM_COUNT: usize = 2;
const SUB_TOP_COUNT: usize = 2;
const SUB_RISING_COUNT: usize = 1;

/// Feed bucket tags, in fair-share tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    SkipReentry,
    Watched,
    CatTop,
    CatRising,
    CatExtra,
    CreatorTop,
    CreatorRising,
    CreatorExtra,
    CreatorFollowed,
    Trending,
    Rising,
    Recent,
    Evergreen,
    Unknown,
    Explore,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::SkipReentry => "SKIP_REENTRY",
            Bucket::Watched => "WATCHED",
            Bucket::CatTop => "CAT:TOP",
            Bucket::CatRising => "CAT:RISING",
            Bucket::CatExtra => "CAT:EXTRA",
            Bucket::CreatorTop => "CREATOR:TOP",
            Bucket::CreatorRising => "CREATOR:RISING",
            Bucket::CreatorExtra => "CREATOR:EXTRA",
            Bucket::CreatorFollowed => "CREATOR:FOLLOWED",
            Bucket::Trending => "TRENDING",
            Bucket::Rising => "RISING",
            Bucket::Recent => "RECENT",
            Bucket::Evergreen => "EVERGREEN",
            Bucket::Unknown => "UNKNOWN",
            Bucket::Explore => "EXPLORE",
        }
    }

    pub fn cap(&self, feed: &crate::config::FeedConfig) -> usize {
        match self {
            Bucket::SkipReentry => feed.cap_skip_reentry,
            Bucket::Watched => feed.cap_watched,
            Bucket::CatTop => feed.cap_cat_top,
            Bucket::CatRising => feed.cap_cat_rising,
            Bucket::CatExtra => feed.cap_cat_extra,
            Bucket::CreatorTop => feed.cap_creator_top,
            Bucket::CreatorRising => feed.cap_creator_rising,
            Bucket::CreatorExtra => feed.cap_creator_extra,
            Bucket::CreatorFollowed => feed.cap_creator_followed,
            Bucket::Trending => feed.cap_trending,
            Bucket::Rising => feed.cap_rising,
            Bucket::Recent => feed.cap_recent,
            Bucket::Evergreen => feed.cap_evergreen,
            Bucket::Unknown => feed.cap_unknown,
            Bucket::Explore => usize::MAX,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A category chosen for sourcing, with the subcategories to sample within.
#[derive(Debug, Clone)]
pub struct SelectedCategory {
    pub name: String,
    pub bucket: Bucket,
    pub sub_categories: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSelection {
    pub categories: Vec<SelectedCategory>,
    /// Creator id → bucket, covering top/rising/extra/followed plus the
    /// optional skip-reentry and watched exploration picks.
    pub creators: Vec<(Uuid, Bucket)>,
}

impl CandidateSelection {
    pub fn creator_bucket(&self, creator_id: Uuid) -> Option<Bucket> {
        self.creators
            .iter()
            .find(|(id, _)| *id == creator_id)
            .map(|(_, b)| *b)
    }

    pub fn creator_ids(&self) -> Vec<Uuid> {
        self.creators.iter().map(|(id, _)| *id).collect()
    }
}

fn sorted_desc<T: Clone>(pool: &[T], score: impl Fn(&T) -> f64) -> Vec<T> {
    let mut sorted = pool.to_vec();
    sorted.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}

fn pick_random<'a, T, R: Rng>(slice: &'a [T], rng: &mut R) -> Option<&'a T> {
    if slice.is_empty() {
        None
    } else {
        slice.get(rng.gen_range(0..slice.len()))
    }
}

fn select_subs<R: Rng>(cat: &CategoryNode, rng: &mut R) -> Vec<String> {
    let mut subs: Vec<String> = Vec::new();
    let top = sorted_desc(&cat.top_subs, |s| s.score);
    let rising = sorted_desc(&cat.rising_subs, |s| s.score);

    for sub in top.iter().take(SUB_TOP_COUNT) {
        subs.push(sub.name.clone());
    }
    if top.len() > SUB_TOP_COUNT {
        if let Some(extra) = pick_random(&top[SUB_TOP_COUNT..], rng) {
            subs.push(extra.name.clone());
        }
    }
    for sub in rising.iter().take(SUB_RISING_COUNT) {
        subs.push(sub.name.clone());
    }
    if rising.len() > SUB_RISING_COUNT {
        if let Some(extra) = pick_random(&rising[SUB_RISING_COUNT..], rng) {
            subs.push(extra.name.clone());
        }
    }

    subs.dedup();
    subs
}

/// Pick the categories and creators to source candidates from.
pub fn select_candidates<R: Rng>(
    state: &ProfileState,
    now_ms: i64,
    skip_reentry_prob: f64,
    watched_prob: f64,
    rng: &mut R,
) -> CandidateSelection {
    let mut selection = CandidateSelection::default();

    let top_cats = sorted_desc(&state.top_interests, |c| c.score);
    let rising_cats = sorted_desc(&state.rising_interests, |c| c.score);

    for cat in top_cats.iter().take(CAT_TOP_COUNT) {
        selection.categories.push(SelectedCategory {
            name: cat.name.clone(),
            bucket: Bucket::CatTop,
            sub_categories: select_subs(cat, rng),
        });
    }
    for cat in rising_cats.iter().take(CAT_RISING_COUNT) {
        selection.categories.push(SelectedCategory {
            name: cat.name.clone(),
            bucket: Bucket::CatRising,
            sub_categories: select_subs(cat, rng),
        });
    }
    if top_cats.len() > CAT_TOP_COUNT {
        if let Some(extra) = pick_random(&top_cats[CAT_TOP_COUNT..], rng) {
            selection.categories.push(SelectedCategory {
                name: extra.name.clone(),
                bucket: Bucket::CatExtra,
                sub_categories: select_subs(extra, rng),
            });
        }
    }
    if rising_cats.len() > CAT_RISING_COUNT {
        if let Some(extra) = pick_random(&rising_cats[CAT_RISING_COUNT..], rng) {
            selection.categories.push(SelectedCategory {
                name: extra.name.clone(),
                bucket: Bucket::CatExtra,
                sub_categories: select_subs(extra, rng),
            });
        }
    }

    let top_creators = sorted_desc(&state.creators.top_creators, |c| c.score);
    let rising_creators = sorted_desc(&state.creators.rising_creators, |c| c.score);

    for creator in top_creators.iter().take(CREATOR_TOP_COUNT) {
        selection
            .creators
            .push((creator.creator_id, Bucket::CreatorTop));
    }
    for creator in rising_creators.iter().take(CREATOR_RISING_COUNT) {
        selection
            .creators
            .push((creator.creator_id, Bucket::CreatorRising));
    }
    if top_creators.len() > CREATOR_TOP_COUNT {
        if let Some(extra) = pick_random(&top_creators[CREATOR_TOP_COUNT..], rng) {
            selection
                .creators
                .push((extra.creator_id, Bucket::CreatorExtra));
        }
    }
    if rising_creators.len() > CREATOR_RISING_COUNT {
        if let Some(extra) = pick_random(&rising_creators[CREATOR_RISING_COUNT..], rng) {
            selection
                .creators
                .push((extra.creator_id, Bucket::CreatorExtra));
        }
    }

    let followed = sorted_desc(&state.following, |f| f.score);
    for f in followed.iter().take(FOLLOWED_TOP_COUNT) {
        selection
            .creators
            .push((f.user_id, Bucket::CreatorFollowed));
    }
    if followed.len() > FOLLOWED_TOP_COUNT {
        for _ in 0..FOLLOWED_RANDOM_COUNT {
            if let Some(extra) = pick_random(&followed[FOLLOWED_TOP_COUNT..], rng) {
                if selection.creator_bucket(extra.user_id).is_none() {
                    selection
                        .creators
                        .push((extra.user_id, Bucket::CreatorFollowed));
                }
            }
        }
    }

    // Exploration picks: a hard-skipped creator past its re-entry gate, and
    // a watched creator, each with independent odds.
    let eligible_skipped: Vec<_> = state
        .creators
        .skipped_creators_pool
        .iter()
        .filter(|e| e.reentry_at <= now_ms)
        .collect();
    if !eligible_skipped.is_empty() && rng.gen_bool(skip_reentry_prob.clamp(0.0, 1.0)) {
        if let Some(pick) = pick_random(&eligible_skipped, rng) {
            selection
                .creators
                .push((pick.creator_id, Bucket::SkipReentry));
        }
    }
    if !state.creators.watched_creators_pool.is_empty()
        && rng.gen_bool(watched_prob.clamp(0.0, 1.0))
    {
        if let Some(pick) = pick_random(&state.creators.watched_creators_pool, rng) {
            selection.creators.push((pick.creator_id, Bucket::Watched));
        }
    }

    selection
}
