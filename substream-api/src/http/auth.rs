//! Bearer caller extraction
//!
//! Authentication itself is the gateway's concern; this layer only turns
//! `Authorization: Bearer <opaque>` into a caller `UserId` through the
//! pluggable [`CallerResolver`] seam.

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use substream_core::models::UserId;

use super::{AppError, AppState};

/// Resolves an opaque bearer token to a caller identity
#[async_trait]
pub trait CallerResolver: Send + Sync {
    /// `Ok(None)` means the token is unknown or expired
    async fn resolve(&self, bearer: &str) -> substream_core::Result<Option<UserId>>;
}

/// Development resolver: the bearer token IS the user id. Never deploy it
/// behind an open port.
#[derive(Debug, Clone, Default)]
pub struct DevCallerResolver;

#[async_trait]
impl CallerResolver for DevCallerResolver {
    async fn resolve(&self, bearer: &str) -> substream_core::Result<Option<UserId>> {
        if bearer.is_empty() {
            return Ok(None);
        }
        Ok(Some(UserId::from(bearer)))
    }
}

/// Authenticated caller, extracted from the Authorization header
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    AppState: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;
        let bearer = extract_bearer_token(header)
            .map_err(AppError::unauthorized)?;

        let user_id = state
            .caller_resolver
            .resolve(bearer)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::unauthorized("Invalid or expired token"))?;

        Ok(Self(user_id))
    }
}

/// Extract the bearer token from an Authorization header value
fn extract_bearer_token(header: &axum::http::HeaderValue) -> Result<&str, String> {
    let value = header
        .to_str()
        .map_err(|_| "Invalid Authorization header value".to_string())?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must start with 'Bearer '".to_string())
}
