use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the credential store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,                      // assigned by the store, starts at 1
    pub name: String,                 // display name
    pub identity: String,             // unique login key (email or username)
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 PHC string, not exposed in JSON
    pub created_at: OffsetDateTime,   // creation timestamp
}

/// Insert payload. Carries the hash only; plaintext never reaches the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub identity: String,
    pub password_hash: String,
}

/// Issued bearer token, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenRecord {
    pub token: String,
    pub user_id: i64,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}
