pub mod producer;
pub mod score_aggregator;
pub mod stats_consumer;

pub use producer::EventProducer;
pub use score_aggregator::ScoreAggregator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Full engagement record published to `engagement-events`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub creator_id: Uuid,
    /// Range check doubles as a NaN rejection: comparisons with NaN fail.
    #[validate(range(min = -1e12, max = 1e12))]
    pub engagement_score: f64,
}

/// Score delta published to `post-score-events`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostScoreEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    #[validate(length(min = 1))]
    pub engagement_type: String,
    #[validate(range(min = -1e12, max = 1e12))]
    pub score_delta: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_event_validation() {
        let event = EngagementEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            category: "Tech".to_string(),
            sub_category: None,
            creator_id: Uuid::new_v4(),
            engagement_score: 1.5,
        };
        assert!(event.validate().is_ok());

        let mut invalid = event.clone();
        invalid.category = String::new();
        assert!(invalid.validate().is_err());

        let mut nan = event;
        nan.engagement_score = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_score_event_serializes_iso8601() {
        let event = PostScoreEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            engagement_type: "like".to_string(),
            score_delta: 1.0,
            timestamp: "2024-06-01T12:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("2024-06-01T12:00:00Z"));
        assert!(json.contains("scoreDelta"));
    }
}
