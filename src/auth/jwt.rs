use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{auth::claims::Claims, config::TokenConfig};

/// Why a token was refused. Kept for diagnostics; callers only ever see
/// [`AuthError::TokenInvalid`](super::error::AuthError::TokenInvalid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    BadSignature,
    WrongIssuerOrAudience,
    Malformed,
}

/// A freshly signed token with its claims.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub claims: Claims,
}

/// Process-wide signing material. Built once at startup, then shared read-only.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub default_ttl: Duration,
}

/// Longest lifetime a token may be signed for.
pub const MAX_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Unix second at which a token issued at `iat` dies: exactly `iat + ttl`.
fn expiry_after(iat: i64, ttl: Duration) -> anyhow::Result<i64> {
    if ttl > MAX_TTL {
        anyhow::bail!("ttl of {}s exceeds maximum of {}s", ttl.as_secs(), MAX_TTL.as_secs());
    }
    let secs = i64::try_from(ttl.as_secs())?;
    iat.checked_add(secs)
        .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))
}

impl TokenKeys {
    pub fn from_secret(secret: &[u8], issuer: &str, audience: &str, default_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            default_ttl,
        }
    }

    pub fn from_config(cfg: &TokenConfig) -> Self {
        let ttl = Duration::from_secs(cfg.ttl_seconds);
        match &cfg.secret {
            Some(secret) => Self::from_secret(secret.as_bytes(), &cfg.issuer, &cfg.audience, ttl),
            None => {
                warn!("TOKEN_SECRET not set; generated a random signing key, tokens will not survive a restart");
                let mut secret = [0u8; 32];
                OsRng.fill_bytes(&mut secret);
                Self::from_secret(&secret, &cfg.issuer, &cfg.audience, ttl)
            }
        }
    }

    /// Sign a token for `user_id`. `iat` is the current whole second, so the
    /// token is valid for between `ttl - 1` and `ttl` seconds of wall time.
    pub fn sign(&self, user_id: i64, ttl: Duration) -> anyhow::Result<SignedToken> {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let exp = expiry_after(iat, ttl)?;
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let claims = Claims {
            sub: user_id.to_string(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: nonce.iter().map(|b| format!("{b:02x}")).collect(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id, exp = claims.exp, "jwt signed");
        Ok(SignedToken { token, claims })
    }

    /// Check signature, issuer, audience and expiry. A token is dead from the
    /// second `exp` is reached; no leeway is granted.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                    TokenRejection::WrongIssuerOrAudience
                }
                _ => TokenRejection::Malformed,
            }
        })?;

        if OffsetDateTime::now_utc().unix_timestamp() >= data.claims.exp {
            return Err(TokenRejection::Expired);
        }
        if data.claims.user_id().is_none() {
            return Err(TokenRejection::Malformed);
        }
        debug!(sub = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

/// Wait until early in a wall-clock second so a 1 s token cannot straddle a
/// second boundary between signing and its first check.
#[cfg(test)]
pub(crate) async fn align_to_second_start() {
    let nanos = OffsetDateTime::now_utc().nanosecond() as u64;
    if nanos > 200_000_000 {
        tokio::time::sleep(Duration::from_nanos(1_000_000_000 - nanos + 5_000_000)).await;
    }
}
