use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{errors::AppError, state::AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests without the configured `x-api-key`; a no-op when no key
/// is configured.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.api_key.as_deref() {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!(path = %req.uri().path(), "api key missing or wrong");
            return Err(AppError::Forbidden);
        }
    }
    Ok(next.run(req).await)
}
