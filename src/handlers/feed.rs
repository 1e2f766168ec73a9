//! Feed endpoint: assemble the diversified ranked feed for the
//! authenticated user and mark the served posts as seen.

use actix_web::{get, web, HttpRequest, HttpResponse};
use tracing::warn;

use crate::app_state::AppState;
use crate::error::Result;
use crate::handlers::identity::UserId;
use crate::handlers::session::{ensure_session, session_cookie};
use crate::metrics;
use crate::models::{FeedData, FeedResponse};

#[get("/feed")]
pub async fn get_feed(
    user: UserId,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let sid = ensure_session(&state, &req, user.0).await;

    let posts = state.feed.build_feed(user.0, sid.as_deref()).await?;

    // Served posts never come back; failure here only risks repeats.
    let served: Vec<_> = posts.iter().map(|p| p.id).collect();
    if let Err(e) = state.profiles.mark_posts_seen(user.0, &served).await {
        warn!(user_id = %user.0, error = %e, "Failed to mark posts seen");
    }

    metrics::FEED_REQUESTS.inc();

    let mut builder = HttpResponse::Ok();
    if let Some(sid) = sid {
        builder.cookie(session_cookie(&sid, state.config.session.ttl_seconds));
    }
    Ok(builder.json(FeedResponse {
        status: "success".to_string(),
        data: FeedData { posts },
    }))
}
