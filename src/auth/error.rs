//! Error types for the credential store and the auth service.

use thiserror::Error;

/// Failures raised by a [`CredentialStore`](super::repo::CredentialStore) backing.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity already exists")]
    DuplicateIdentity,

    #[error("record not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateIdentity,
            other => StoreError::Backend(other.into()),
        }
    }
}

/// Errors returned to callers of [`AuthService`](super::services::AuthService).
///
/// Storage errors are translated before they reach this type, so nothing
/// backend-specific leaks to the presentation layer.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("identity already exists")]
    DuplicateIdentity,

    /// Covers both "unknown identity" and "wrong password".
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Bad signature, malformed structure or expired.
    #[error("invalid or expired token")]
    TokenInvalid,

    #[error("user not found")]
    UserNotFound,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentity => AuthError::DuplicateIdentity,
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Backend(inner) => AuthError::Internal(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_auth_errors() {
        assert!(matches!(
            AuthError::from(StoreError::DuplicateIdentity),
            AuthError::DuplicateIdentity
        ));
        assert!(matches!(AuthError::from(StoreError::NotFound), AuthError::NotFound));
        assert!(matches!(
            AuthError::from(StoreError::Backend(anyhow::anyhow!("pool closed"))),
            AuthError::Internal(_)
        ));
    }

    #[test]
    fn row_not_found_becomes_not_found() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound
        ));
    }

    #[test]
    fn internal_error_display_hides_detail() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.5"));
        assert_eq!(err.to_string(), "internal error");
    }
}
