use std::convert::Infallible;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    role::{Actor, Role},
};

/// Header set by an upstream edge while the identity provider is still
/// resolving the session.
pub const SESSION_LOADING_HEADER: &str = "x-session-loading";
/// Local-only development bypass: act as the given role without a token.
pub const BYPASS_ROLE_HEADER: &str = "x-actor-role";
pub const BYPASS_DEPARTMENT_HEADER: &str = "x-actor-department";
pub const BYPASS_USER_HEADER: &str = "x-user-id";

/// Claims
///
/// Payload expected inside the bearer token issued by the university's
/// identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the account id.
    pub sub: Uuid,
    /// Role name as issued (`admin`, `PDT`, ...). Matched case-insensitively.
    pub role: Option<String>,
    /// Department scope for faculty staff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

/// Decodes a bearer token into an actor. Any failure yields `None`; the
/// caller treats that as an anonymous session.
pub fn actor_from_token(token: &str, secret: &str) -> Option<Actor> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let claims = match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => data.claims,
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("bearer token expired"),
                kind => tracing::debug!(?kind, "bearer token rejected"),
            }
            return None;
        }
    };

    let mut actor = Actor::authenticated(claims.sub, claims.role.as_deref().and_then(Role::parse))
        .with_token(token);
    actor.department_id = claims.department_id;
    Some(actor)
}

/// Actor Extractor (Role Resolver)
///
/// Resolves the current actor for a request. It never rejects: a missing or
/// invalid token produces an anonymous actor, and the route guard decides
/// whether that means a login redirect.
///
/// Resolution order:
/// 1. An actor already placed in the request extensions by `route_guard`.
/// 2. `x-session-loading` → a loading actor (decision deferred).
/// 3. Local bypass: `x-actor-role` (+ `x-actor-department`, `x-user-id`) in
///    `Env::Local`.
/// 4. `Authorization: Bearer <jwt>` validated against the configured secret.
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(actor) = parts.extensions.get::<Actor>() {
            return Ok(actor.clone());
        }

        if header_str(parts, SESSION_LOADING_HEADER) == Some("1") {
            return Ok(Actor::loading());
        }

        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            if let Some(role) = header_str(parts, BYPASS_ROLE_HEADER).and_then(Role::parse) {
                let id = header_str(parts, BYPASS_USER_HEADER)
                    .and_then(|raw| Uuid::parse_str(raw).ok())
                    .unwrap_or_else(Uuid::nil);
                let mut actor = Actor::authenticated(id, Some(role));
                actor.department_id = header_str(parts, BYPASS_DEPARTMENT_HEADER).map(str::to_string);
                return Ok(actor);
            }
        }

        let token = header_str(parts, header::AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "));

        Ok(token
            .and_then(|token| actor_from_token(token, &config.jwt_secret))
            .unwrap_or_else(Actor::anonymous))
    }
}
