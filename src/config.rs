use std::time::Duration;

use anyhow::bail;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";
const DEFAULT_MONGO_URL: &str = "mongodb://localhost:27017";
const DEFAULT_TTL_HOURS: i64 = 24;
/// Ten years; longer lifetimes are treated as misconfiguration.
const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Mongo,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "sql" => Ok(Self::Postgres),
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown STORE_BACKEND {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_hours: i64,
}

impl JwtConfig {
    pub fn ttl(&self) -> Duration {
        let hours = self.ttl_hours.clamp(1, MAX_TTL_HOURS) as u64;
        Duration::from_secs(hours * 3600)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.secret == DEV_JWT_SECRET
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    pub mongo_db: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_env: String,
    pub store: StoreConfig,
    pub jwt: JwtConfig,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kind = match var("STORE_BACKEND") {
            Some(v) => v.parse::<StoreKind>()?,
            None => StoreKind::Postgres,
        };
        let url = match kind {
            StoreKind::Mongo => var("DATABASE_URL")
                .or_else(|| var("MONGO_URI"))
                .unwrap_or_else(|| DEFAULT_MONGO_URL.to_string()),
            StoreKind::Memory => var("DATABASE_URL").unwrap_or_default(),
            StoreKind::Postgres => match var("DATABASE_URL") {
                Some(url) => url,
                None => bail!(
                    "DATABASE_URL is not set; the postgres store requires a connection string"
                ),
            },
        };
        let store = StoreConfig {
            kind,
            url,
            mongo_db: var("MONGO_DB").unwrap_or_else(|| "appdb".into()),
            max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
        };

        let jwt = JwtConfig {
            secret: var("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into()),
            ttl_hours: var("JWT_TTL_HOURS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|h| (1..=MAX_TTL_HOURS).contains(h))
                .unwrap_or(DEFAULT_TTL_HOURS),
        };

        Ok(Self {
            app_env: var("APP_ENV").unwrap_or_else(|| "development".into()),
            store,
            jwt,
            request_timeout_secs: var("REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|s| *s > 0)
                .unwrap_or(30),
        })
    }

    pub fn is_development(&self) -> bool {
        matches!(self.app_env.as_str(), "development" | "dev" | "local" | "test")
    }

    /// True when the built-in JWT secret would be used in a non-development environment.
    pub fn dev_secret_outside_development(&self) -> bool {
        self.jwt.uses_dev_secret() && !self.is_development()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
