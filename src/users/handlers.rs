use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::UpdateUserRequest;
use crate::{
    auth::{dto::RegisterRequest, services::AuthService},
    db::{User, UserId},
    error::ApiError,
    state::AppState,
};

pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

fn parse_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse::<UserId>()
        .map_err(|_| ApiError::validation("invalid user id"))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.store.list_all().await?))
}

#[instrument(skip(auth, payload))]
pub async fn create_user(
    State(auth): State<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(payload) = payload?;
    let user = auth.create_user(payload).await?;
    info!(user_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.store.find_by_id(&id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id)?;
    let Json(payload) = payload?;
    let patch = payload.into_patch()?;
    let user = state.store.update(&id, patch).await?;
    info!(user_id = %user.id, "user updated");
    Ok(Json(user))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.store.delete(&id).await?;
    info!(user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
