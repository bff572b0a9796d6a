// Authentication is out of scope (§1): the core only consumes an
// authenticated user id, it does not verify passcodes or bearer tokens
// itself. This extractor stands in for whatever real auth middleware a
// production deployment fronts the daemon with — it trusts the
// `Authorization: Bearer <user-id>` header outright, the same shape real
// auth would resolve to before handing off to these handlers.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use money_common::{Error, UserId};
use std::future::{ready, Ready};
use std::str::FromStr;
use uuid::Uuid;

pub struct AuthenticatedUser(pub UserId);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let result = match header.and_then(|token| Uuid::from_str(token).ok()) {
            Some(uuid) => Ok(AuthenticatedUser(UserId::from(uuid))),
            None => Err(Error::Auth { message: "missing or malformed Authorization bearer token".into() }.into()),
        };
        ready(result)
    }
}

/// §6 "user_id in path must equal authenticated user (admin bypass
/// excepted)". No admin role exists yet, so this is a straight equality
/// check; an admin bypass would slot in here.
pub fn require_self(path_user: UserId, authenticated: UserId) -> Result<(), Error> {
    if path_user == authenticated {
        Ok(())
    } else {
        Err(Error::Auth { message: "cannot act on another user's allocation".into() })
    }
}
