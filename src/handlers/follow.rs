//! Follow toggle. Follows are durable relationships: the toggle writes
//! through to the persistent profile and, when a session is live, to the
//! session mirror as well.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::Result;
use crate::handlers::identity::UserId;
use crate::handlers::session::{ensure_session, session_cookie};
use crate::services::profile_access::{PersistentAccess, SessionAccess};

#[post("/user/{id}/follow")]
pub async fn toggle_follow(
    user: UserId,
    path: web::Path<Uuid>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let creator_id = path.into_inner();
    let sid = ensure_session(&state, &req, user.0).await;

    let persistent = PersistentAccess::new(state.profiles.clone(), user.0);
    let following = state
        .creator
        .toggle_follow(&persistent, creator_id)
        .await?;

    if let Some(sid) = &sid {
        let _guard = state.locks.acquire(sid).await;
        let session = SessionAccess::new(state.sessions.clone(), sid.clone(), user.0);
        // Mirror the persistent outcome rather than toggling independently.
        state
            .creator
            .set_follow(&session, creator_id, following)
            .await?;
    }

    let mut builder = HttpResponse::Ok();
    if let Some(sid) = sid {
        builder.cookie(session_cookie(&sid, state.config.session.ttl_seconds));
    }
    Ok(builder.json(json!({ "status": "success", "following": following })))
}
