//! Engagement controller: validates the payload, resolves the profile
//! backing, and dispatches to the interest, creator and post-metrics
//! services before publishing to the event bus.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::config::ScoringConfig;
use crate::error::{AppError, Result};
use crate::events::{EngagementEvent, PostScoreEvent};
use crate::handlers::identity::UserId;
use crate::handlers::session::{ensure_session, session_cookie};
use crate::metrics;
use crate::models::Post;
use crate::services::profile_access::{PersistentAccess, ProfileAccess, SessionAccess};

#[derive(Debug, Deserialize, Validate)]
pub struct PositiveEngagementRequest {
    #[validate(nested)]
    pub engagement: EngagementPayload,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EngagementPayload {
    pub post_id: Uuid,
    #[validate(range(min = 0, max = 1))]
    pub viewed: i32,
    #[validate(range(min = 0, max = 1))]
    pub completed: i32,
    #[validate(range(min = 0, max = 1))]
    pub liked: i32,
    #[validate(range(min = 0, max = 1))]
    pub commented: i32,
    #[validate(range(min = 0, max = 1))]
    pub shared: i32,
    #[validate(range(min = 0, max = 1))]
    pub followed: i32,
}

impl EngagementPayload {
    pub fn weight(&self, scoring: &ScoringConfig) -> f64 {
        self.viewed as f64 * scoring.weight_view
            + self.liked as f64 * scoring.weight_like
            + self.commented as f64 * scoring.weight_comment
            + self.shared as f64 * scoring.weight_share
            + self.completed as f64 * scoring.weight_completion
    }

    fn primary_type(&self) -> &'static str {
        if self.shared == 1 {
            "share"
        } else if self.commented == 1 {
            "comment"
        } else if self.completed == 1 {
            "completion"
        } else if self.liked == 1 {
            "like"
        } else {
            "view"
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NegativeEngagementRequest {
    #[validate(nested)]
    pub skip: SkipPayload,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SkipPayload {
    pub post_id: Uuid,
}

/// Resolve the profile backing for this request, holding the session lock
/// for the duration of the mutation when a session is live.
async fn resolve_access(
    state: &AppState,
    req: &HttpRequest,
    user_id: Uuid,
) -> (
    Box<dyn ProfileAccess>,
    Option<String>,
    Option<tokio::sync::OwnedMutexGuard<()>>,
) {
    match ensure_session(state, req, user_id).await {
        Some(sid) => {
            let guard = state.locks.acquire(&sid).await;
            let access = Box::new(SessionAccess::new(
                state.sessions.clone(),
                sid.clone(),
                user_id,
            )) as Box<dyn ProfileAccess>;
            (access, Some(sid), Some(guard))
        }
        None => {
            let access =
                Box::new(PersistentAccess::new(state.profiles.clone(), user_id))
                    as Box<dyn ProfileAccess>;
            (access, None, None)
        }
    }
}

fn respond(sid: Option<String>, ttl_seconds: u64) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    if let Some(sid) = sid {
        builder.cookie(session_cookie(&sid, ttl_seconds));
    }
    builder.json(json!({ "status": "success" }))
}

#[post("/engagement/positive")]
pub async fn positive_engagement(
    user: UserId,
    req: HttpRequest,
    body: web::Json<PositiveEngagementRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    body.validate()?;
    let payload = &body.engagement;
    let weight = payload.weight(&state.config.scoring);

    let post = load_post(&state, payload.post_id).await?;
    let (access, sid, _guard) = resolve_access(&state, &req, user.0).await;

    state
        .interest
        .score_interest(
            access.as_ref(),
            &post.category,
            Some(post.sub_category.as_str()),
            post.specific.as_deref(),
            weight,
        )
        .await?;
    state
        .creator
        .score_creator(access.as_ref(), post.creator, weight)
        .await?;
    state.post_metrics.record(post.id, weight).await?;

    publish_events(&state, &post, user.0, payload.primary_type(), weight).await;

    metrics::ENGAGEMENTS_TOTAL.with_label_values(&["positive"]).inc();
    Ok(respond(sid, state.config.session.ttl_seconds))
}

#[post("/engagement/negative")]
pub async fn negative_engagement(
    user: UserId,
    req: HttpRequest,
    body: web::Json<NegativeEngagementRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    body.validate()?;

    let post = load_post(&state, body.skip.post_id).await?;
    let (access, sid, _guard) = resolve_access(&state, &req, user.0).await;

    state
        .interest
        .skip_interest(
            access.as_ref(),
            &post.category,
            Some(post.sub_category.as_str()),
            post.specific.as_deref(),
        )
        .await?;
    state
        .creator
        .skip_creator(access.as_ref(), post.creator)
        .await?;

    // Negative pressure flows to the aggregator through the score topic.
    let event = PostScoreEvent {
        post_id: post.id,
        user_id: user.0,
        engagement_type: "skip".to_string(),
        score_delta: state.config.scoring.skip_weight,
        timestamp: chrono::Utc::now(),
    };
    if let Err(e) = state
        .score_producer
        .publish(&post.id.to_string(), &event)
        .await
    {
        error!("Failed to publish skip score event: {:?}", e);
    }

    metrics::ENGAGEMENTS_TOTAL.with_label_values(&["negative"]).inc();
    Ok(respond(sid, state.config.session.ttl_seconds))
}

async fn load_post(state: &AppState, post_id: Uuid) -> Result<Post> {
    state
        .posts
        .get(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))
}

/// Publish to both topics; delivery failures degrade to logs so the
/// request-path profile updates stand.
async fn publish_events(
    state: &AppState,
    post: &Post,
    user_id: Uuid,
    engagement_type: &str,
    weight: f64,
) {
    let engagement = EngagementEvent {
        post_id: post.id,
        user_id,
        category: post.category.clone(),
        sub_category: Some(post.sub_category.clone()),
        creator_id: post.creator,
        engagement_score: weight,
    };
    if let Err(e) = state
        .engagement_producer
        .publish(&post.id.to_string(), &engagement)
        .await
    {
        warn!("Failed to publish engagement event: {:?}", e);
    }

    let score = PostScoreEvent {
        post_id: post.id,
        user_id,
        engagement_type: engagement_type.to_string(),
        score_delta: weight,
        timestamp: chrono::Utc::now(),
    };
    if let Err(e) = state
        .score_producer
        .publish(&post.id.to_string(), &score)
        .await
    {
        warn!("Failed to publish score event: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(viewed: i32, liked: i32) -> EngagementPayload {
        EngagementPayload {
            post_id: Uuid::new_v4(),
            viewed,
            completed: 0,
            liked,
            commented: 0,
            shared: 0,
            followed: 0,
        }
    }

    #[test]
    fn test_weight_sums_flag_weights() {
        let scoring = ScoringConfig::default();
        // viewed + liked = 0.5 + 1.0
        assert!((payload(1, 1).weight(&scoring) - 1.5).abs() < 1e-12);
        assert_eq!(payload(0, 0).weight(&scoring), 0.0);
    }

    #[test]
    fn test_flags_outside_unit_range_rejected() {
        let request = PositiveEngagementRequest {
            engagement: EngagementPayload {
                viewed: 2,
                ..payload(0, 0)
            },
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_primary_type_precedence() {
        let mut p = payload(1, 1);
        assert_eq!(p.primary_type(), "like");
        p.shared = 1;
        assert_eq!(p.primary_type(), "share");
    }
}
