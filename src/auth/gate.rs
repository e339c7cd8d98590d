use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use thiserror::Error;
use tower_cookies::Cookies;
use tracing::{debug, warn};

use super::jwt::TokenService;
use crate::{errors::AppError, store::CredentialStore, users::model::UserRecord};

/// Name of the session cookie set on register/login.
pub const TOKEN_COOKIE: &str = "token";

/// Why a protected request was turned away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("No token provided")]
    NoToken,
    #[error("Invalid or expired token")]
    InvalidOrExpired,
    /// The token is genuine but its subject has since been deleted.
    #[error("User no longer exists")]
    PrincipalGone,
}

/// Resolves a raw session token to the principal it belongs to.
///
/// Read-only: evaluated once per protected request, never mutates.
#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<TokenService>,
    store: Arc<dyn CredentialStore>,
}

impl AuthGate {
    pub fn new(tokens: Arc<TokenService>, store: Arc<dyn CredentialStore>) -> Self {
        Self { tokens, store }
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserRecord, AppError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthRejection::NoToken)?;

        let subject = self.tokens.verify(token).map_err(|e| {
            debug!(error = %e, "token rejected");
            AuthRejection::InvalidOrExpired
        })?;

        match self.store.find_by_id(subject).await? {
            Some(principal) => Ok(principal),
            None => {
                warn!(user_id = %subject, "valid token for deleted user");
                Err(AuthRejection::PrincipalGone.into())
            }
        }
    }
}

/// Token from `Authorization: Bearer …`, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| {
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticated principal for the current request.
///
/// The bearer header wins; otherwise the `token` cookie is used.
pub struct AuthUser(pub UserRecord);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthGate: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = AuthGate::from_ref(state);
        if let Some(token) = bearer_token(&parts.headers) {
            return Ok(AuthUser(gate.authenticate(Some(token)).await?));
        }

        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::Internal(anyhow::anyhow!(msg)))?;
        let token = cookies
            .get(TOKEN_COOKIE)
            .map(|c| c.value_trimmed().to_string());
        Ok(AuthUser(gate.authenticate(token.as_deref()).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::jwt::tests::jwt_config,
        clock::ManualClock,
        store::file::FileStore,
        users::model::fixtures::new_user,
    };
    use axum::http::HeaderValue;

    async fn setup() -> (AuthGate, Arc<TokenService>, Arc<FileStore>, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("users.json")).await.unwrap());
        let clock = Arc::new(ManualClock::new(time::OffsetDateTime::now_utc()));
        let tokens = Arc::new(TokenService::new(&jwt_config("s3cret", "iss", "aud"), clock.clone()));
        let gate = AuthGate::new(tokens.clone(), store.clone());
        (gate, tokens, store, clock, dir)
    }

    fn rejection(err: AppError) -> AuthRejection {
        match err {
            AppError::Unauthorized(r) => r,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_token_is_no_token() {
        let (gate, ..) = setup().await;
        assert_eq!(rejection(gate.authenticate(None).await.unwrap_err()), AuthRejection::NoToken);
        assert_eq!(rejection(gate.authenticate(Some("  ")).await.unwrap_err()), AuthRejection::NoToken);
    }

    #[tokio::test]
    async fn bad_or_expired_token_is_rejected() {
        let (gate, tokens, store, clock, _dir) = setup().await;
        let user = store.insert(new_user("a@example.com", None)).await.unwrap();

        let err = gate.authenticate(Some("not.a.jwt")).await.unwrap_err();
        assert_eq!(rejection(err), AuthRejection::InvalidOrExpired);

        let token = tokens.issue(user.id).unwrap();
        clock.advance(time::Duration::minutes(6));
        let err = gate.authenticate(Some(&token)).await.unwrap_err();
        assert_eq!(rejection(err), AuthRejection::InvalidOrExpired);
    }

    #[tokio::test]
    async fn valid_token_resolves_principal_until_deleted() {
        let (gate, tokens, store, _clock, _dir) = setup().await;
        let user = store.insert(new_user("a@example.com", None)).await.unwrap();
        let token = tokens.issue(user.id).unwrap();

        let principal = gate.authenticate(Some(&token)).await.unwrap();
        assert_eq!(principal.id, user.id);

        store.delete(user.id).await.unwrap();
        let err = gate.authenticate(Some(&token)).await.unwrap_err();
        assert_eq!(rejection(err), AuthRejection::PrincipalGone);
    }

    #[test]
    fn bearer_token_is_read_from_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn other_schemes_are_not_bearer_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
