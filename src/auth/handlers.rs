use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest},
        middleware::{require_auth, CurrentUser},
        services::AuthService,
    },
    db::User,
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn me_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[instrument(skip(auth, payload))]
pub async fn register(
    State(auth): State<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let Json(payload) = payload?;
    let response = auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[instrument(skip(auth, payload))]
pub async fn login(
    State(auth): State<AuthService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(payload) = payload?;
    Ok(Json(auth.login(payload).await?))
}

#[instrument(skip_all)]
pub async fn get_me(current: Option<Extension<CurrentUser>>) -> Result<Json<User>, ApiError> {
    match current {
        Some(Extension(CurrentUser(user))) => Ok(Json(user)),
        None => {
            error!("/me reached without require_auth");
            Err(ApiError::Internal("no authenticated user on request".into()))
        }
    }
}
