use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    errors::ApiError,
    state::AppState,
    users::{
        dto::{CreateUserRequest, DeleteUserResponse, UpdateUserRequest, UserListResponse, UserResponse},
        extractors::{JsonBody, UserId},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UserListResponse>, ApiError> {
    let users = state.users.list_users().await?;
    Ok(Json(UserListResponse {
        count: users.len(),
        users,
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    UserId(id): UserId,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(state.users.get_user(id).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateUserRequest>,
) -> Result<(StatusCode, HeaderMap, Json<UserResponse>), ApiError> {
    let user = state.users.create_user(payload).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/users/{}", user.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    UserId(id): UserId,
    JsonBody(payload): JsonBody<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(state.users.update_user(id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    UserId(id): UserId,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    let id = state.users.delete_user(id).await?;
    Ok(Json(DeleteUserResponse {
        message: "User deleted successfully".into(),
        id,
    }))
}
