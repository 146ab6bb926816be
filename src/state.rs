use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::{
    jwt::TokenKeys,
    memory::MemoryCredentialStore,
    password::Argon2Hasher,
    repo::{CredentialStore, PgCredentialStore},
    services::AuthService,
};
use crate::config::{AppConfig, IdentityKind, PasswordConfig, TokenConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn CredentialStore> = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;

                // Run migrations if present
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    tracing::warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(PgCredentialStore::new(db))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory credential store");
                Arc::new(MemoryCredentialStore::new())
            }
        };

        Self::from_parts(config, store)
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let hasher = Arc::new(Argon2Hasher::new(&config.password)?);
        let keys = Arc::new(TokenKeys::from_config(&config.token));
        let auth = AuthService::new(
            store,
            hasher,
            keys,
            config.identity_kind,
            config.password.min_len,
        )?;
        Ok(Self { config, auth })
    }

    /// In-memory state with cheap hashing parameters, for tests.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            identity_kind: IdentityKind::Email,
            token: TokenConfig {
                secret: Some("test".into()),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_seconds: 300,
            },
            password: PasswordConfig {
                min_len: PasswordConfig::default().min_len,
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        });
        Self::from_parts(config, Arc::new(MemoryCredentialStore::new()))
            .expect("fake state builds")
    }
}
