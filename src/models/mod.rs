use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// One level of the interest hierarchy: a category with its nested sub pools.
///
/// All node timestamps are integer milliseconds so the same shape round-trips
/// through the session blob (camelCase JSON, ms ints) and the JSONB columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub name: String,
    pub score: f64,
    pub last_updated: i64,
    #[serde(default)]
    pub top_subs: Vec<SubNode>,
    #[serde(default)]
    pub rising_subs: Vec<SubNode>,
}

impl CategoryNode {
    pub fn new(name: &str, now_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            score: 0.0,
            last_updated: now_ms,
            top_subs: Vec::new(),
            rising_subs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubNode {
    pub name: String,
    pub score: f64,
    pub last_updated: i64,
    #[serde(default)]
    pub specific: Vec<SpecificNode>,
}

impl SubNode {
    pub fn new(name: &str, now_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            score: 0.0,
            last_updated: now_ms,
            specific: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificNode {
    pub name: String,
    pub score: f64,
    pub last_updated: i64,
}

impl SpecificNode {
    pub fn new(name: &str, now_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            score: 0.0,
            last_updated: now_ms,
        }
    }
}

/// A creator the user engages with positively (top or rising pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorNode {
    pub creator_id: Uuid,
    pub score: f64,
    pub last_updated: i64,
    #[serde(default)]
    pub skips: u32,
    #[serde(default)]
    pub last_skip_at: Option<i64>,
}

impl CreatorNode {
    pub fn new(creator_id: Uuid, now_ms: i64) -> Self {
        Self {
            creator_id,
            score: 0.0,
            last_updated: now_ms,
            skips: 0,
            last_skip_at: None,
        }
    }
}

/// Entry in the watched or skipped cool-off pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoolOffEntry {
    pub creator_id: Uuid,
    pub skips: u32,
    pub last_skip_update: i64,
    pub reentry_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowedCreator {
    pub user_id: Uuid,
    pub score: f64,
    pub last_updated: i64,
    #[serde(default)]
    pub skips: u32,
    #[serde(default)]
    pub last_skip_at: Option<i64>,
    #[serde(default)]
    pub reentry_at: Option<i64>,
}

impl FollowedCreator {
    pub fn new(user_id: Uuid, now_ms: i64) -> Self {
        Self {
            user_id,
            score: 0.0,
            last_updated: now_ms,
            skips: 0,
            last_skip_at: None,
            reentry_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorsInterests {
    #[serde(default)]
    pub top_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub rising_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub watched_creators_pool: Vec<CoolOffEntry>,
    #[serde(default)]
    pub skipped_creators_pool: Vec<CoolOffEntry>,
}

/// The hot subset of a user profile shared by the session and persistent paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileState {
    #[serde(default)]
    pub top_interests: Vec<CategoryNode>,
    #[serde(default)]
    pub rising_interests: Vec<CategoryNode>,
    #[serde(default)]
    pub creators: CreatorsInterests,
    #[serde(default)]
    pub following: Vec<FollowedCreator>,
}

impl ProfileState {
    /// Find a category node in either interest pool.
    pub fn category(&self, name: &str) -> Option<&CategoryNode> {
        self.top_interests
            .iter()
            .chain(self.rising_interests.iter())
            .find(|c| c.name == name)
    }

    pub fn creator_score(&self, creator_id: Uuid) -> Option<f64> {
        self.creators
            .top_creators
            .iter()
            .chain(self.creators.rising_creators.iter())
            .find(|c| c.creator_id == creator_id)
            .map(|c| c.score)
            .or_else(|| {
                self.following
                    .iter()
                    .find(|f| f.user_id == creator_id)
                    .map(|f| f.score)
            })
    }
}

/// Persistent user document.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub state: ProfileState,
    pub seen_posts: HashSet<Uuid>,
}

/// Session blob mirrored into the fast store under `sess:<sessionId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProfile {
    pub user_id: Uuid,
    #[serde(default)]
    pub top_categories: Vec<CategoryNode>,
    #[serde(default)]
    pub rising_categories: Vec<CategoryNode>,
    #[serde(default)]
    pub top_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub rising_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub watched_creators: Vec<CoolOffEntry>,
    #[serde(default)]
    pub skipped_creators: Vec<CoolOffEntry>,
    #[serde(default)]
    pub followed_creators: Vec<FollowedCreator>,
}

impl SessionProfile {
    pub fn from_state(user_id: Uuid, state: ProfileState) -> Self {
        Self {
            user_id,
            top_categories: state.top_interests,
            rising_categories: state.rising_interests,
            top_creators: state.creators.top_creators,
            rising_creators: state.creators.rising_creators,
            watched_creators: state.creators.watched_creators_pool,
            skipped_creators: state.creators.skipped_creators_pool,
            followed_creators: state.following,
        }
    }

    pub fn into_state(self) -> ProfileState {
        ProfileState {
            top_interests: self.top_categories,
            rising_interests: self.rising_categories,
            creators: CreatorsInterests {
                top_creators: self.top_creators,
                rising_creators: self.rising_creators,
                watched_creators_pool: self.watched_creators,
                skipped_creators_pool: self.skipped_creators,
            },
            following: self.followed_creators,
        }
    }
}

/// A single weighted engagement inside the rising window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowEvent {
    pub ts: i64,
    pub weight: f64,
}

/// Post document with its velocity and popularity metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub creator: Uuid,
    pub category: String,
    pub sub_category: String,
    pub specific: Option<String>,
    pub impression_count: i64,
    pub engagement_sum: f64,
    pub raw_score: f64,
    pub trending_score: f64,
    pub short_term_velocity_ema: f64,
    pub historical_velocity_ema: f64,
    pub bayesian_score: f64,
    pub cumulative_score: f64,
    pub is_evergreen: bool,
    pub is_rising: bool,
    #[serde(default)]
    pub window_events: Vec<WindowEvent>,
    pub created_at: DateTime<Utc>,
    pub last_trending_update: DateTime<Utc>,
    pub last_score_update: DateTime<Utc>,
}

/// Shared counter shape for the three stats families.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatCounters {
    pub impression_count: i64,
    pub total_engagement: f64,
}

impl StatCounters {
    /// Average engagement per impression; 0 when no impressions yet.
    pub fn avg(&self) -> f64 {
        if self.impression_count > 0 {
            self.total_engagement / self.impression_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Category,
    Subcategory,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Subcategory => "subcategory",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feed entry returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: Uuid,
    pub creator: Uuid,
    pub category: String,
    pub sub_category: String,
    pub bucket: String,
    pub overall_score: f64,
    pub trending_score: f64,
    pub bayesian_score: f64,
    pub is_rising: bool,
    pub is_evergreen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub status: String,
    pub data: FeedData,
}

#[derive(Debug, Serialize)]
pub struct FeedData {
    pub posts: Vec<FeedPost>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_counters_avg_zero_denominator() {
        let stats = StatCounters::default();
        assert_eq!(stats.avg(), 0.0);

        let stats = StatCounters {
            impression_count: 4,
            total_engagement: 6.0,
        };
        assert_eq!(stats.avg(), 1.5);
    }

    #[test]
    fn test_session_profile_round_trip() {
        let user_id = Uuid::new_v4();
        let mut state = ProfileState::default();
        state.top_interests.push(CategoryNode::new("Tech", 1_000));
        state
            .creators
            .top_creators
            .push(CreatorNode::new(Uuid::new_v4(), 1_000));

        let blob = SessionProfile::from_state(user_id, state.clone());
        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.contains("topCategories"));
        assert!(json.contains("lastUpdated"));

        let back: SessionProfile = serde_json::from_str(&json).unwrap();
        let restored = back.into_state();
        assert_eq!(restored.top_interests[0].name, "Tech");
        assert_eq!(restored.creators.top_creators.len(), 1);
    }

    #[test]
    fn test_entity_type_str() {
        assert_eq!(EntityType::Category.as_str(), "category");
        assert_eq!(EntityType::Subcategory.as_str(), "subcategory");
    }
}
