use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Ten years. Keeps `now + timeout` well inside chrono's range.
pub const MAX_TOKEN_TIMEOUT_MINUTES: i64 = 10 * 366 * 24 * 60;

/// Which token store is active. Exactly one per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Mongo,
    Redis,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Backend::Memory),
            "mongo" | "mongodb" => Ok(Backend::Mongo),
            "redis" => Ok(Backend::Redis),
            other => anyhow::bail!("unknown token backend '{}' (expected memory, mongo or redis)", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Token lifetime in minutes, applied at issue and on every renewal.
    /// Set via TOKEN_TIMEOUT_MINUTES. Default: 60.
    pub token_timeout_minutes: i64,
    pub backend: Backend,
    pub mongo_url: String,
    /// host:port
    pub redis_addr: String,
    pub redis_password: Option<String>,
    pub redis_db: i64,
}

impl Config {
    pub fn token_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_timeout_minutes)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_timeout_minutes: 60,
            backend: Backend::Memory,
            mongo_url: "mongodb://127.0.0.1:27017".into(),
            redis_addr: "127.0.0.1:6379".into(),
            redis_password: None,
            redis_db: 0,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup. `load` passes the process environment.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let token_timeout_minutes = match lookup("TOKEN_TIMEOUT_MINUTES") {
        Some(v) => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("TOKEN_TIMEOUT_MINUTES is not a number: '{}'", v))?,
        None => defaults.token_timeout_minutes,
    };
    if token_timeout_minutes <= 0 {
        anyhow::bail!("TOKEN_TIMEOUT_MINUTES must be positive, got {}", token_timeout_minutes);
    }
    if token_timeout_minutes > MAX_TOKEN_TIMEOUT_MINUTES {
        anyhow::bail!(
            "TOKEN_TIMEOUT_MINUTES must be at most {}, got {}",
            MAX_TOKEN_TIMEOUT_MINUTES,
            token_timeout_minutes
        );
    }

    let backend = match lookup("TOKEN_BACKEND") {
        Some(v) => v.parse::<Backend>().context("invalid TOKEN_BACKEND")?,
        None => defaults.backend,
    };

    let redis_db = match lookup("REDIS_DB") {
        Some(v) => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("REDIS_DB is not a number: '{}'", v))?,
        None => defaults.redis_db,
    };

    Ok(Config {
        token_timeout_minutes,
        backend,
        mongo_url: lookup("MONGO_URL").unwrap_or(defaults.mongo_url),
        redis_addr: lookup("REDIS_ADDR").unwrap_or(defaults.redis_addr),
        redis_password: lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()),
        redis_db,
    })
}
