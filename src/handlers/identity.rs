//! Authenticated identity at the service boundary.
//!
//! Authentication itself is an upstream concern; the edge injects the
//! verified user id as the `X-User-Id` header.

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

impl FromRequest for UserId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let parsed = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok());

        ready(match parsed {
            Some(user_id) => Ok(UserId(user_id)),
            None => Err(AppError::Authentication(
                "Missing or invalid user identity".to_string(),
            )),
        })
    }
}
