use std::{path::PathBuf, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub uploads: UploadConfig,
    pub client_url: String,
    pub host: String,
    pub port: u16,
    pub api_base: String,
}

const DEFAULT_TTL: &str = "7d";
const DEFAULT_MAX_UPLOAD: usize = 5 * 1024 * 1024;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so it can be tested
    /// without mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .context("JWT_SECRET must be set")?;
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let ttl_raw = lookup("JWT_EXPIRES_IN").unwrap_or_else(|| DEFAULT_TTL.into());
        let ttl = parse_ttl(&ttl_raw).with_context(|| format!("invalid JWT_EXPIRES_IN {ttl_raw:?}"))?;

        let jwt = JwtConfig {
            secret,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "userhub".into()),
            ttl,
        };

        let max_bytes = match lookup("UPLOAD_MAX_BYTES") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("invalid UPLOAD_MAX_BYTES {v:?}"))?,
            None => DEFAULT_MAX_UPLOAD,
        };
        let uploads = UploadConfig {
            dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_bytes,
        };

        let port = match lookup("PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("invalid PORT {v:?}"))?,
            None => 5000,
        };

        let api_base = lookup("API_BASE").unwrap_or_else(|| "/api/users".into());
        anyhow::ensure!(api_base.starts_with('/'), "API_BASE must start with '/'");

        Ok(Self {
            database_url,
            jwt,
            uploads,
            client_url: lookup("CLIENT_URL").unwrap_or_else(|| "http://localhost:5173".into()),
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

/// Parses `3600`, `45s`, `30m`, `12h` or `7d` into a duration.
pub fn parse_ttl(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits.parse().context("expected a number")?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 60 * 60,
        "d" => n * 60 * 60 * 24,
        other => anyhow::bail!("unknown unit {other:?}"),
    };
    anyhow::ensure!(secs > 0, "ttl must be positive");
    Ok(Duration::from_secs(secs))
}
