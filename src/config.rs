use serde::Deserialize;

/// Which field acts as the unique login key for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Email,
    Username,
}

impl IdentityKind {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "username" => Ok(Self::Username),
            other => anyhow::bail!("unknown IDENTITY_KIND: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// `None` means a random key is generated at startup.
    pub secret: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub min_len: usize,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_len: 6,
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub identity_kind: IdentityKind,
    pub token: TokenConfig,
    pub password: PasswordConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let identity_kind = match std::env::var("IDENTITY_KIND") {
            Ok(v) => IdentityKind::parse(&v)?,
            Err(_) => IdentityKind::Email,
        };
        let token = TokenConfig {
            secret: std::env::var("TOKEN_SECRET").ok().filter(|v| !v.is_empty()),
            issuer: std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "credcore".into()),
            audience: std::env::var("TOKEN_AUDIENCE").unwrap_or_else(|_| "credcore-users".into()),
            ttl_seconds: env_or("TOKEN_TTL_SECONDS", 3600),
        };
        let max_ttl = crate::auth::jwt::MAX_TTL.as_secs();
        if token.ttl_seconds == 0 || token.ttl_seconds > max_ttl {
            anyhow::bail!("TOKEN_TTL_SECONDS must be between 1 and {max_ttl}");
        }
        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            min_len: env_or("MIN_PASSWORD_LEN", defaults.min_len),
            memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_or("ARGON2_PARALLELISM", defaults.parallelism),
        };
        Ok(Self {
            database_url,
            identity_kind,
            token,
            password,
        })
    }
}
