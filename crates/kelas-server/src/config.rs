use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use kelas_forum::{DEFAULT_SUBSCRIPTION_BUFFER, UnlistedMembership};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub unlisted_membership: UnlistedMembership,
    pub subscription_buffer: usize,
}

impl Config {
    /// Read `KELAS_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("KELAS_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("KELAS_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let port = match get("KELAS_PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("invalid KELAS_PORT '{}'", v))?,
            None => 3000,
        };

        let unlisted_membership = match get("KELAS_UNLISTED_MEMBERSHIP") {
            Some(v) => v
                .parse::<UnlistedMembership>()
                .with_context(|| format!("invalid KELAS_UNLISTED_MEMBERSHIP '{}'", v))?,
            None => UnlistedMembership::default(),
        };

        let subscription_buffer = match get("KELAS_SUBSCRIPTION_BUFFER") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => bail!("invalid KELAS_SUBSCRIPTION_BUFFER '{}': expected a positive integer", v),
            },
            None => DEFAULT_SUBSCRIPTION_BUFFER,
        };

        Ok(Self {
            host: get("KELAS_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("KELAS_DB_PATH").unwrap_or_else(|| "kelas.db".into()).into(),
            jwt_secret,
            unlisted_membership,
            subscription_buffer,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
