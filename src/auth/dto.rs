use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::repo_types::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub identity: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identity: String,
    pub password: String,
}

/// Request body for an explicit token request.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub ttl_seconds: Option<u64>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub identity: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            identity: u.identity,
            created_at: u.created_at,
        }
    }
}

/// Bearer token plus its validity window (unix seconds).
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Outcome of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(flatten)]
    pub token: IssuedToken,
    pub user: PublicUser,
}

impl Session {
    pub fn user_id(&self) -> i64 {
        self.user.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_from_user_drops_hash() {
        let user = User {
            id: 3,
            name: "Alice".into(),
            identity: "alice@example.com".into(),
            password_hash: "$argon2id$secret-material".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(json.contains("1970-01-01T00:00:00Z"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn session_serializes_flat_token_fields() {
        let session = Session {
            token: IssuedToken {
                token: "a.b.c".into(),
                issued_at: 10,
                expires_at: 3610,
            },
            user: PublicUser {
                id: 1,
                name: "Alice".into(),
                identity: "alice@example.com".into(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            },
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["token"], "a.b.c");
        assert_eq!(value["expires_at"], 3610);
        assert_eq!(value["user"]["id"], 1);
    }

    #[test]
    fn token_request_ttl_is_optional() {
        let req: TokenRequest = serde_json::from_str("{}").unwrap();
        assert!(req.ttl_seconds.is_none());
    }
}
