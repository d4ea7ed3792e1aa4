use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::services::AuthService;
use crate::{db::User, error::ApiError};

/// Identity resolved by [`require_auth`], stored in the request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Token part of `Authorization: Bearer <token>`; the scheme is case-insensitive.
pub(crate) fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub async fn require_auth(
    State(auth): State<AuthService>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("missing Authorization header");
            ApiError::unauthorized()
        })?;

    let token = bearer_token(header).ok_or_else(|| {
        warn!("invalid Authorization header");
        ApiError::unauthorized()
    })?;

    let user = auth.authenticate(token).await?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
