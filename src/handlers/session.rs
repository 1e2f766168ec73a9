//! Session cookie plumbing and explicit logout.
//!
//! Cookie `sid`: HttpOnly, SameSite=Lax, Max-Age = session TTL. A request
//! with a live session refreshes it; otherwise a fresh uuid session is
//! hydrated from the persistent profile.

use actix_web::cookie::{Cookie, SameSite};
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::Result;
use crate::handlers::identity::UserId;
use crate::metrics;

pub const SESSION_COOKIE: &str = "sid";

/// Resolve the request's session: refresh a live one, or start a new one.
/// Returns the session id, or None when the fast store is unavailable and
/// the caller should fall back to the persistent path.
pub async fn ensure_session(
    state: &AppState,
    req: &HttpRequest,
    user_id: Uuid,
) -> Option<String> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        let sid = cookie.value().to_string();
        match state.sessions.get_session(&sid).await {
            Ok(Some(blob)) if blob.user_id == user_id => {
                if let Err(e) = state.lifecycle.refresh(&sid).await {
                    warn!(session_id = %sid, error = %e, "Session refresh failed");
                }
                return Some(sid);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %sid, error = %e, "Session lookup failed");
                return None;
            }
        }
    }

    let sid = Uuid::new_v4().to_string();
    match state.lifecycle.start(&sid, user_id).await {
        Ok(()) => {
            metrics::SESSIONS_STARTED.inc();
            Some(sid)
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Session start failed; using persistent path");
            None
        }
    }
}

pub fn session_cookie(session_id: &str, ttl_seconds: u64) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, session_id.to_owned())
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(actix_web::cookie::time::Duration::seconds(ttl_seconds as i64))
        .path("/")
        .finish()
}

#[post("/session/logout")]
pub async fn logout(
    _user: UserId,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        state.lifecycle.logout(cookie.value()).await?;
    }

    let mut expired = session_cookie("", 0);
    expired.make_removal();
    Ok(HttpResponse::Ok()
        .cookie(expired)
        .json(json!({ "status": "success" })))
}
