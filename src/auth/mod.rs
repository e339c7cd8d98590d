use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod gate;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod policy;

pub fn router() -> Router<AppState> {
    handlers::session_routes()
}
