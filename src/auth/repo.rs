use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::auth::{
    error::StoreError,
    repo_types::{NewUser, TokenRecord, User},
};

/// Persistence collaborator for users and issued tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert the user unless the identity is taken.
    ///
    /// The check and the insert are one atomic step: of several concurrent
    /// calls with the same identity exactly one succeeds and the rest get
    /// [`StoreError::DuplicateIdentity`].
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_identity(&self, identity: &str) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<User, StoreError>;
    async fn record_token(&self, record: TokenRecord) -> Result<(), StoreError>;
    async fn tokens_for_user(&self, user_id: i64) -> Result<Vec<TokenRecord>, StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        // ON CONFLICT relies on the unique index over users.identity.
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, identity, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (identity) DO NOTHING
            RETURNING id, name, identity, password_hash, created_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.identity)
        .bind(&new.password_hash)
        .fetch_optional(&self.db)
        .await?;

        match user {
            Some(u) => {
                debug!(user_id = u.id, "user row inserted");
                Ok(u)
            }
            None => Err(StoreError::DuplicateIdentity),
        }
    }

    async fn find_by_identity(&self, identity: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, identity, password_hash, created_at
            FROM users
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, identity, password_hash, created_at FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn record_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token, user_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.token)
        .bind(record.user_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&self.db)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn tokens_for_user(&self, user_id: i64) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRecord>(
            r#"
            SELECT token, user_id, issued_at, expires_at
            FROM tokens
            WHERE user_id = $1
            ORDER BY issued_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
