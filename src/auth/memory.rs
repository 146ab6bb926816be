use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{
    error::StoreError,
    repo::CredentialStore,
    repo_types::{NewUser, TokenRecord, User},
};

/// Expired token records are swept once the map grows past this size.
const PRUNE_FLOOR: usize = 1024;

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    by_identity: HashMap<String, i64>,
    tokens: HashMap<String, TokenRecord>,
    prune_at: usize,
    last_id: i64,
}

impl Inner {
    fn prune_expired(&mut self, now: OffsetDateTime) {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at > now);
        self.prune_at = (self.tokens.len() * 2).max(PRUNE_FLOOR);
        debug!(removed = before - self.tokens.len(), "pruned expired tokens");
    }
}

/// In-process store for tests and local runs without a database.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Inner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a user along with its token records. Tokens already handed out
    /// stay signed but stop verifying.
    pub async fn remove_user(&self, id: i64) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.users.remove(&id).ok_or(StoreError::NotFound)?;
        inner.by_identity.remove(&user.identity);
        inner.tokens.retain(|_, t| t.user_id != id);
        Ok(user)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        // Held across check and insert.
        let mut inner = self.inner.write().await;
        if inner.by_identity.contains_key(&new.identity) {
            return Err(StoreError::DuplicateIdentity);
        }
        inner.last_id += 1;
        let user = User {
            id: inner.last_id,
            name: new.name,
            identity: new.identity,
            password_hash: new.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.by_identity.insert(user.identity.clone(), user.id);
        inner.users.insert(user.id, user.clone());
        debug!(user_id = user.id, "user inserted in memory store");
        Ok(user)
    }

    async fn find_by_identity(&self, identity: &str) -> Result<User, StoreError> {
        let inner = self.inner.read().await;
        inner
            .by_identity
            .get(identity)
            .and_then(|id| inner.users.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn record_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.tokens.contains_key(&record.token) {
            return Err(StoreError::Backend(anyhow::anyhow!("token already recorded")));
        }
        if inner.tokens.len() >= inner.prune_at {
            inner.prune_expired(OffsetDateTime::now_utc());
        }
        inner.tokens.insert(record.token.clone(), record);
        Ok(())
    }

    async fn tokens_for_user(&self, user_id: i64) -> Result<Vec<TokenRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<TokenRecord> = inner
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(rows)
    }
}
