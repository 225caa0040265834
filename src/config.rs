use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Full DSN override, takes precedence over the individual parts.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }

    /// Connection string safe to put in logs.
    pub fn redacted(&self) -> String {
        match &self.url {
            Some(_) => "DATABASE_URL (redacted)".to_string(),
            None => format!(
                "postgres://{}:***@{}:{}/{}",
                self.user, self.host, self.port, self.name
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let db = DbConfig {
            host: var("DB_HOST", "localhost"),
            port: parse(&lookup, "DB_PORT", 5432)?,
            user: var("DB_USER", "postgres"),
            password: var("DB_PASSWORD", "postgres"),
            name: var("DB_NAME", "users"),
            url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
        };
        let http = HttpConfig {
            host: var("APP_HOST", "0.0.0.0"),
            port: parse(&lookup, "APP_PORT", 8080)?,
            request_timeout: Duration::from_secs(parse(&lookup, "REQUEST_TIMEOUT_SECS", 30)?),
        };
        Ok(Self { db, http })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}
