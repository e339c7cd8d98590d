use std::sync::Arc;

use axum::extract::FromRef;
use tracing::info;

use crate::{
    auth::{gate::AuthGate, jwt::TokenService, password::PasswordHasher},
    config::{AppConfig, StoreBackend},
    store::{file::FileStore, postgres::PgStore, CredentialStore},
    users::service::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserService>,
    pub gate: AuthGate,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn CredentialStore> = match &config.store {
            StoreBackend::Postgres { database_url } => {
                let store = PgStore::connect(database_url).await?;
                store.migrate().await?;
                info!("using postgres store");
                Arc::new(store)
            }
            StoreBackend::File { path } => {
                let store = FileStore::open(path.clone()).await?;
                info!(path = %store.path().display(), "using file store");
                Arc::new(store)
            }
        };

        let tokens = Arc::new(TokenService::from_config(&config.jwt));
        Ok(Self::from_parts(config, store, tokens, PasswordHasher::default()))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
    ) -> Self {
        let users = Arc::new(UserService::new(store.clone(), tokens.clone(), hasher));
        Self {
            config: Arc::new(config),
            users,
            gate: AuthGate::new(tokens, store),
        }
    }

    /// State over a fresh file store, with a controllable clock and cheap
    /// hashing.
    #[cfg(test)]
    pub async fn for_tests(
        dir: &std::path::Path,
        clock: Arc<dyn crate::clock::Clock>,
        api_key: Option<&str>,
    ) -> Self {
        use crate::auth::jwt::tests::jwt_config;

        let jwt = jwt_config("test-secret", "userdir", "userdir-users");
        let config = AppConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            store: StoreBackend::File {
                path: dir.join("users.json"),
            },
            jwt: jwt.clone(),
            cookie_ttl_days: 1,
            api_key: api_key.map(str::to_string),
        };
        let store = Arc::new(FileStore::open(dir.join("users.json")).await.unwrap());
        let tokens = Arc::new(TokenService::new(&jwt, clock));
        Self::from_parts(config, store, tokens, PasswordHasher::fast())
    }
}

impl FromRef<AppState> for AuthGate {
    fn from_ref(state: &AppState) -> Self {
        state.gate.clone()
    }
}
