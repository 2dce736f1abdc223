//! Process configuration from environment variables.

use std::time::Duration;

use flowra_observability::LogFormat;

/// Which backends to wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppMode {
    /// Postgres + redis.
    Real,
    /// In-memory everything (dev, tests, demos).
    Mock,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IdpConfig {
    pub url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: AppMode,
    pub host: String,
    pub port: u16,
    pub database: Option<DatabaseConfig>,
    pub redis_url: Option<String>,
    pub bus_channel_prefix: String,
    pub idp: Option<IdpConfig>,
    pub jwt_secret: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub user_sync_interval: Duration,
    pub user_sync_disabled: bool,
    pub repair_worker_disabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("{name} is required in real mode")]
    MissingInRealMode { name: &'static str },
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn env_flag(name: &'static str) -> bool {
    env(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(name, default_secs)?))
}

impl Config {
    /// Load from the process environment.
    ///
    /// Mock mode needs nothing; real mode requires the store connection and
    /// fails fast on startup otherwise.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match env("APP_MODE").as_deref() {
            Some("mock") => AppMode::Mock,
            Some("real") | None => AppMode::Real,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "APP_MODE",
                    value: other.to_string(),
                });
            }
        };

        let database = match env("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?,
                acquire_timeout: env_duration_secs("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
            }),
            None if mode == AppMode::Real => {
                return Err(ConfigError::MissingInRealMode {
                    name: "DATABASE_URL",
                });
            }
            None => None,
        };

        let idp = match (env("IDP_URL"), env("IDP_REALM")) {
            (Some(url), Some(realm)) => Some(IdpConfig {
                url,
                realm,
                client_id: env("IDP_CLIENT_ID").unwrap_or_default(),
                client_secret: env("IDP_CLIENT_SECRET").unwrap_or_default(),
            }),
            _ => None,
        };

        let jwt_secret = env("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            "dev-secret".to_string()
        });

        Ok(Self {
            mode,
            host: env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("SERVER_PORT", 8080u16)?,
            database,
            redis_url: env("REDIS_URL"),
            bus_channel_prefix: env("BUS_CHANNEL_PREFIX").unwrap_or_else(|| "flowra".to_string()),
            idp,
            jwt_secret,
            read_timeout: env_duration_secs("READ_TIMEOUT_SECS", 60)?,
            write_timeout: env_duration_secs("WRITE_TIMEOUT_SECS", 10)?,
            shutdown_timeout: env_duration_secs("SHUTDOWN_TIMEOUT_SECS", 20)?,
            log_level: env("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: env("LOG_FORMAT")
                .map(|v| LogFormat::from_env_value(&v))
                .unwrap_or_default(),
            user_sync_interval: env_duration_secs("USER_SYNC_INTERVAL", 15 * 60)?,
            user_sync_disabled: env_flag("USER_SYNC_DISABLED"),
            repair_worker_disabled: env_flag("REPAIR_WORKER_DISABLED"),
        })
    }

    /// A ready-to-run mock configuration (tests, demos).
    pub fn mock() -> Self {
        Self {
            mode: AppMode::Mock,
            host: "127.0.0.1".to_string(),
            port: 0,
            database: None,
            redis_url: None,
            bus_channel_prefix: "flowra".to_string(),
            idp: None,
            jwt_secret: "dev-secret".to_string(),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            user_sync_interval: Duration::from_secs(900),
            user_sync_disabled: true,
            repair_worker_disabled: false,
        }
    }
}
