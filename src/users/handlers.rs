use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, MessageResponse, RegisterRequest, UpdateDetailsRequest, UserResponse,
    UsersResponse,
};
use crate::{auth::gate::AuthUser, errors::AppError, state::AppState};

/// Account routes for the authenticated principal.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_own_details))
        .route("/users/update", put(update_own_details))
        .route("/users/update-password", put(change_own_password))
}

/// Directory administration; any authenticated principal may call these.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/all", get(list_all))
        .route("/users/create", post(admin_create))
        .route("/users/update/:id", put(update_by_id))
        .route("/users/delete/:id", delete(delete_by_id))
        .route("/users/:id", get(get_by_id))
}

/// A path id that is not a UUID cannot name any record.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse().map_err(|_| {
        debug!(id = %raw, "malformed user id");
        AppError::NotFound
    })
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_own_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<UserResponse> {
    Json(UserResponse::ok(state.users.get_own_details(&user), None))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_own_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateDetailsRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let Json(payload) = payload?;
    let updated = state.users.update_own_details(&user, payload).await?;
    Ok(Json(UserResponse::ok(updated, Some("User details updated successfully"))))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_own_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    state.users.change_own_password(&user, payload).await?;
    Ok(Json(MessageResponse::ok("Password updated successfully")))
}

#[instrument(skip_all)]
pub async fn list_all(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Result<Json<UsersResponse>, AppError> {
    let users = state.users.list_all().await?;
    Ok(Json(UsersResponse {
        success: true,
        users,
    }))
}

#[instrument(skip(state, _caller))]
pub async fn get_by_id(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.users.get_by_id(parse_id(&id)?).await?;
    Ok(Json(UserResponse::ok(user, None)))
}

#[instrument(skip(state, _caller, payload))]
pub async fn update_by_id(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDetailsRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let Json(payload) = payload?;
    let user = state.users.update_by_id(id, payload).await?;
    Ok(Json(UserResponse::ok(user, Some("User updated successfully"))))
}

#[instrument(skip(state, _caller))]
pub async fn delete_by_id(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.users.delete_by_id(parse_id(&id)?).await?;
    Ok(Json(MessageResponse::ok("User deleted successfully")))
}

#[instrument(skip_all)]
pub async fn admin_create(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let user = state.users.admin_create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse::ok(user, Some("User created successfully"))),
    ))
}
