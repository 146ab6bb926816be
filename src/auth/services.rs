use std::{sync::Arc, time::Duration};

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        dto::{IssuedToken, PublicUser, Session},
        error::{AuthError, StoreError},
        jwt::{TokenKeys, MAX_TTL},
        password::SecretHasher,
        repo::CredentialStore,
        repo_types::{NewUser, TokenRecord, User},
    },
    config::IdentityKind,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

/// Registration, login and token lifecycle over an injected store.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    keys: Arc<TokenKeys>,
    identity_kind: IdentityKind,
    min_password_len: usize,
    /// Verified against when the identity is unknown, so both login failure
    /// paths cost one hash verification.
    dummy_hash: Arc<str>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        keys: Arc<TokenKeys>,
        identity_kind: IdentityKind,
        min_password_len: usize,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hasher
            .hash("credcore-dummy-password")
            .context("hash dummy password")?;
        Ok(Self {
            store,
            hasher,
            keys,
            identity_kind,
            min_password_len,
            dummy_hash: dummy_hash.into(),
        })
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    pub fn identity_kind(&self) -> IdentityKind {
        self.identity_kind
    }

    /// Canonical form used for storage and lookup.
    pub fn normalize_identity(&self, raw: &str) -> String {
        match self.identity_kind {
            IdentityKind::Email => raw.trim().to_lowercase(),
            IdentityKind::Username => raw.trim().to_string(),
        }
    }

    fn validate_identity(&self, identity: &str) -> Result<(), AuthError> {
        let ok = match self.identity_kind {
            IdentityKind::Email => is_valid_email(identity),
            IdentityKind::Username => is_valid_username(identity),
        };
        if ok {
            Ok(())
        } else {
            let msg = match self.identity_kind {
                IdentityKind::Email => "Invalid email",
                IdentityKind::Username => "Invalid username",
            };
            Err(AuthError::Validation(msg.into()))
        }
    }

    async fn hash_blocking(&self, plain: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| AuthError::Internal(e.into()))?
            .map_err(AuthError::Internal)
    }

    async fn verify_blocking(&self, plain: &str, stored: &str) -> bool {
        let hasher = self.hasher.clone();
        let plain = plain.to_owned();
        let stored = stored.to_owned();
        match tokio::task::spawn_blocking(move || hasher.verify(&plain, &stored)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                error!(error = %e, "stored password hash unreadable");
                false
            }
            Err(e) => {
                error!(error = %e, "password verification task failed");
                false
            }
        }
    }

    /// Constant-time check of `plain` against a stored hash. Malformed hashes
    /// never match.
    pub fn verify_password(&self, plain: &str, stored: &str) -> bool {
        match self.hasher.verify(plain, stored) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stored password hash unreadable");
                false
            }
        }
    }

    /// Create an account. Does not log the user in.
    #[instrument(skip(self, name, password))]
    pub async fn register(
        &self,
        name: &str,
        identity: &str,
        password: &str,
    ) -> Result<PublicUser, AuthError> {
        let identity = self.normalize_identity(identity);
        self.validate_identity(&identity)?;

        let name = name.trim();
        if name.is_empty() {
            warn!("empty name");
            return Err(AuthError::Validation("Name is required".into()));
        }
        if password.chars().count() < self.min_password_len {
            warn!("password too short");
            return Err(AuthError::Validation("Password too short".into()));
        }

        // Cheap early exit; the insert below is what actually enforces uniqueness.
        match self.store.find_by_identity(&identity).await {
            Ok(_) => {
                warn!("identity already registered");
                return Err(AuthError::DuplicateIdentity);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let password_hash = self.hash_blocking(password).await?;
        let user = self
            .store
            .create_user(NewUser {
                name: name.to_string(),
                identity,
                password_hash,
            })
            .await
            .map_err(|e| {
                match &e {
                    StoreError::DuplicateIdentity => warn!("identity already registered"),
                    other => error!(error = %other, "create user failed"),
                }
                AuthError::from(e)
            })?;

        info!(user_id = user.id, "user registered");
        Ok(user.into())
    }

    /// Check credentials and open a session with a fresh token.
    ///
    /// Unknown identities and wrong passwords both return
    /// [`AuthError::InvalidCredentials`] after the same amount of hashing work.
    #[instrument(skip(self, password))]
    pub async fn login(&self, identity: &str, password: &str) -> Result<Session, AuthError> {
        let identity = self.normalize_identity(identity);

        let user = match self.store.find_by_identity(&identity).await {
            Ok(u) => Some(u),
            Err(StoreError::NotFound) => None,
            Err(e) => {
                error!(error = %e, "find_by_identity failed");
                return Err(e.into());
            }
        };

        let stored = user
            .as_ref()
            .map(|u| u.password_hash.as_str())
            .unwrap_or(&*self.dummy_hash);
        let ok = self.verify_blocking(password, stored).await;

        let user = match user {
            Some(u) if ok => u,
            Some(u) => {
                warn!(user_id = u.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!("login unknown identity");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let token = self.sign_and_record(user.id, self.keys.default_ttl).await?;
        info!(user_id = user.id, "user logged in");
        Ok(Session {
            token,
            user: user.into(),
        })
    }

    /// Issue a token for an existing user. `ttl` defaults to the configured
    /// lifetime (3600 s unless overridden) and must lie in `1s..=MAX_TTL`.
    #[instrument(skip(self))]
    pub async fn issue_token(
        &self,
        user_id: i64,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = ttl.unwrap_or(self.keys.default_ttl);
        if ttl.as_secs() == 0 {
            return Err(AuthError::Validation("ttl_seconds must be positive".into()));
        }
        if ttl > MAX_TTL {
            return Err(AuthError::Validation("ttl_seconds too large".into()));
        }
        match self.store.find_by_id(user_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => return Err(AuthError::UserNotFound),
            Err(e) => return Err(e.into()),
        }
        self.sign_and_record(user_id, ttl).await
    }

    async fn sign_and_record(&self, user_id: i64, ttl: Duration) -> Result<IssuedToken, AuthError> {
        let signed = self.keys.sign(user_id, ttl).map_err(|e| {
            error!(error = %e, "jwt sign failed");
            AuthError::Internal(e)
        })?;
        let record = TokenRecord {
            token: signed.token.clone(),
            user_id,
            issued_at: unix_to_datetime(signed.claims.iat)?,
            expires_at: unix_to_datetime(signed.claims.exp)?,
        };
        self.store.record_token(record).await.map_err(|e| {
            error!(error = %e, user_id, "record token failed");
            AuthError::from(e)
        })?;
        Ok(IssuedToken {
            token: signed.token,
            issued_at: signed.claims.iat,
            expires_at: signed.claims.exp,
        })
    }

    /// Resolve a bearer token to the user id it was issued for.
    ///
    /// Every decoding failure is reported as [`AuthError::TokenInvalid`]; the
    /// precise reason only goes to debug logs.
    pub async fn verify_token(&self, token: &str) -> Result<i64, AuthError> {
        self.verified_user(token).await.map(|u| u.id)
    }

    /// Like [`verify_token`](Self::verify_token) but returns the user record.
    pub async fn authenticate(&self, token: &str) -> Result<PublicUser, AuthError> {
        self.verified_user(token).await.map(PublicUser::from)
    }

    async fn verified_user(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.keys.verify(token).map_err(|reason| {
            debug!(?reason, "token rejected");
            AuthError::TokenInvalid
        })?;
        let user_id = claims.user_id().ok_or(AuthError::TokenInvalid)?;

        match self.store.find_by_id(user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => {
                warn!(user_id, "token for missing user");
                Err(AuthError::UserNotFound)
            }
            Err(e) => {
                error!(error = %e, user_id, "find_by_id failed");
                Err(e.into())
            }
        }
    }

    pub async fn find_user(&self, user_id: i64) -> Result<PublicUser, AuthError> {
        Ok(self.store.find_by_id(user_id).await?.into())
    }

    pub async fn tokens_for_user(&self, user_id: i64) -> Result<Vec<TokenRecord>, AuthError> {
        Ok(self.store.tokens_for_user(user_id).await?)
    }
}

fn unix_to_datetime(ts: i64) -> Result<OffsetDateTime, AuthError> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| AuthError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::{
        memory::MemoryCredentialStore,
        password::{cheap_hasher, Argon2Hasher},
    };

    struct CountingHasher {
        inner: Argon2Hasher,
        verifies: AtomicUsize,
    }

    impl SecretHasher for CountingHasher {
        fn hash(&self, plain: &str) -> anyhow::Result<String> {
            self.inner.hash(plain)
        }

        fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(plain, hash)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        by_id_lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
            self.inner.create_user(new).await
        }

        async fn find_by_identity(&self, identity: &str) -> Result<User, StoreError> {
            self.inner.find_by_identity(identity).await
        }

        async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
            self.by_id_lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_id(id).await
        }

        async fn record_token(&self, record: TokenRecord) -> Result<(), StoreError> {
            self.inner.record_token(record).await
        }

        async fn tokens_for_user(&self, user_id: i64) -> Result<Vec<TokenRecord>, StoreError> {
            self.inner.tokens_for_user(user_id).await
        }
    }

    fn test_keys() -> Arc<TokenKeys> {
        Arc::new(TokenKeys::from_secret(
            b"test-secret",
            "test-issuer",
            "test-aud",
            Duration::from_secs(3600),
        ))
    }

    fn make_service_with(kind: IdentityKind) -> (AuthService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let svc = AuthService::new(store.clone(), Arc::new(cheap_hasher()), test_keys(), kind, 6)
            .expect("service");
        (svc, store)
    }

    fn make_service() -> (AuthService, Arc<MemoryCredentialStore>) {
        make_service_with(IdentityKind::Email)
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[test]
    fn username_validation() {
        assert!(is_valid_username("alice_01"));
        assert!(!is_valid_username("al"));
        assert!(!is_valid_username("alice smith"));
    }

    #[tokio::test]
    async fn register_then_login_returns_same_user() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        assert_eq!(user.id, 1);
        let session = svc.login("alice@example.com", "Secr3t!").await.unwrap();
        assert_eq!(session.user_id(), user.id);
        assert_eq!(svc.verify_token(&session.token.token).await.unwrap(), user.id);
    }

    #[tokio::test]
    async fn register_normalizes_email() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "  Alice@Example.COM ", "Secr3t!").await.unwrap();
        assert_eq!(user.identity, "alice@example.com");
        assert!(svc.login("ALICE@example.com", "Secr3t!").await.is_ok());
    }

    #[tokio::test]
    async fn register_stores_hash_not_password() {
        let (svc, store) = make_service();
        svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let stored = store.find_by_identity("alice@example.com").await.unwrap();
        assert_ne!(stored.password_hash, "Secr3t!");
        assert!(svc.verify_password("Secr3t!", &stored.password_hash));
        assert!(!svc.verify_password("secr3t!", &stored.password_hash));
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let (svc, _) = make_service();
        assert!(matches!(
            svc.register("Alice", "not-an-email", "Secr3t!").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            svc.register("   ", "alice@example.com", "Secr3t!").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            svc.register("Alice", "alice@example.com", "short").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn register_duplicate_identity() {
        let (svc, _) = make_service();
        svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let err = svc
            .register("Other Alice", "alice@example.com", "An0ther!")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateIdentity));
        assert_eq!(err.to_string(), "identity already exists");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_has_single_winner() {
        let (svc, _) = make_service();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.register(&format!("Racer {i}"), "race@example.com", "Secr3t!")
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AuthError::DuplicateIdentity) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_identity_look_the_same() {
        let (svc, _) = make_service();
        svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();

        let wrong = svc.login("alice@example.com", "wrong").await.unwrap_err();
        let unknown = svc.login("bob@example.com", "Secr3t!").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn username_deployment() {
        let (svc, _) = make_service_with(IdentityKind::Username);
        let user = svc.register("Alice", "alice_01", "Secr3t!").await.unwrap();
        assert_eq!(user.identity, "alice_01");
        assert!(svc.login("alice_01", "Secr3t!").await.is_ok());
        assert!(matches!(
            svc.register("Bob", "bob@example.com", "Secr3t!").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn issue_token_records_it() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let issued = svc.issue_token(user.id, None).await.unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, 3600);

        let rows = svc.tokens_for_user(user.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, issued.token);
    }

    #[tokio::test]
    async fn issue_token_rejects_ttl_out_of_range() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();

        for ttl in [MAX_TTL + Duration::from_secs(1), Duration::from_secs(u64::MAX)] {
            match svc.issue_token(user.id, Some(ttl)).await {
                Err(AuthError::Validation(msg)) => assert_eq!(msg, "ttl_seconds too large"),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
        assert!(matches!(
            svc.issue_token(user.id, Some(Duration::ZERO)).await,
            Err(AuthError::Validation(_))
        ));
        assert!(svc.issue_token(user.id, Some(MAX_TTL)).await.is_ok());
        assert_eq!(svc.tokens_for_user(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_logins_verify_exactly_one_hash() {
        let hasher = Arc::new(CountingHasher {
            inner: cheap_hasher(),
            verifies: AtomicUsize::new(0),
        });
        let svc = AuthService::new(
            Arc::new(MemoryCredentialStore::new()),
            hasher.clone(),
            test_keys(),
            IdentityKind::Email,
            6,
        )
        .unwrap();
        svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 0);

        let unknown = svc.login("nobody@example.com", "Secr3t!").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);

        let wrong = svc.login("alice@example.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn authenticate_looks_user_up_once() {
        let store = Arc::new(CountingStore::default());
        let svc = AuthService::new(
            store.clone(),
            Arc::new(cheap_hasher()),
            test_keys(),
            IdentityKind::Email,
            6,
        )
        .unwrap();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let signed = svc.keys().sign(user.id, Duration::from_secs(60)).unwrap();

        let before = store.by_id_lookups.load(Ordering::SeqCst);
        let me = svc.authenticate(&signed.token).await.unwrap();
        assert_eq!(me.id, user.id);
        assert_eq!(store.by_id_lookups.load(Ordering::SeqCst) - before, 1);
    }

    #[tokio::test]
    async fn issue_token_for_unknown_user() {
        let (svc, _) = make_service();
        assert!(matches!(
            svc.issue_token(42, None).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn verify_token_rejects_tampering() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let issued = svc.issue_token(user.id, None).await.unwrap();

        let mut chars: Vec<char> = issued.token.chars().collect();
        let last = chars.len() - 5;
        chars[last] = if chars[last] == 'x' { 'y' } else { 'x' };
        let altered: String = chars.into_iter().collect();

        assert!(matches!(
            svc.verify_token(&altered).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            svc.verify_token("garbage").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn verify_token_expires() {
        let (svc, _) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        crate::auth::jwt::align_to_second_start().await;
        let issued = svc
            .issue_token(user.id, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, 1);
        assert_eq!(svc.verify_token(&issued.token).await.unwrap(), user.id);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(matches!(
            svc.verify_token(&issued.token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn verify_token_for_removed_user() {
        let (svc, store) = make_service();
        let user = svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let issued = svc.issue_token(user.id, None).await.unwrap();
        store.remove_user(user.id).await.unwrap();
        assert!(matches!(
            svc.verify_token(&issued.token).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn signed_token_for_never_existing_user() {
        let (svc, _) = make_service();
        let signed = svc.keys().sign(999, Duration::from_secs(60)).unwrap();
        assert!(matches!(
            svc.verify_token(&signed.token).await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn authenticate_returns_public_user() {
        let (svc, _) = make_service();
        svc.register("Alice", "alice@example.com", "Secr3t!").await.unwrap();
        let session = svc.login("alice@example.com", "Secr3t!").await.unwrap();
        let me = svc.authenticate(&session.token.token).await.unwrap();
        assert_eq!(me.name, "Alice");
        assert_eq!(me, svc.find_user(1).await.unwrap());
        assert!(matches!(svc.find_user(2).await, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn malformed_stored_hash_fails_closed() {
        let (svc, store) = make_service();
        store
            .create_user(NewUser {
                name: "Legacy".into(),
                identity: "legacy@example.com".into(),
                password_hash: "plaintext-oops".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            svc.login("legacy@example.com", "plaintext-oops").await,
            Err(AuthError::InvalidCredentials)
        ));
    }
}
