use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_cookies::{
    cookie::{time::Duration, SameSite},
    Cookie, Cookies,
};
use tracing::instrument;

use super::gate::{AuthUser, TOKEN_COOKIE};
use crate::{
    errors::AppError,
    state::AppState,
    users::dto::{LoginRequest, MessageResponse, RegisterRequest, Session, SessionResponse},
};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
}

fn session_cookie(token: String, ttl_days: i64) -> Cookie<'static> {
    let mut cookie = Cookie::new(TOKEN_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::days(ttl_days));
    cookie
}

fn cleared_cookie() -> Cookie<'static> {
    let mut cookie = session_cookie(String::new(), 0);
    cookie.make_removal();
    cookie
}

fn session_response(
    state: &AppState,
    cookies: &Cookies,
    session: Session,
    message: &'static str,
) -> Json<SessionResponse> {
    cookies.add(session_cookie(
        session.token.clone(),
        state.config.cookie_ttl_days,
    ));
    Json(SessionResponse {
        success: true,
        message,
        token: session.token,
        user: session.user,
    })
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let session = state.users.register(payload).await?;
    Ok((
        StatusCode::CREATED,
        session_response(&state, &cookies, session, "User registered successfully"),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let session = state.users.login(payload).await?;
    Ok(session_response(&state, &cookies, session, "Login successful"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    AuthUser(user): AuthUser,
) -> Json<MessageResponse> {
    state.users.logout(&user);
    cookies.add(cleared_cookie());
    Json(MessageResponse::ok("Logged out successfully"))
}
