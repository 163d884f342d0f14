//! Configuration
//! Everything is loaded from environment variables; sensitive values are wrapped in `Secret`.

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Port used when neither `PORT` nor `AUTH_SERVER__PORT` is set.
pub const DEFAULT_PORT: u16 = 5001;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host, e.g. "0.0.0.0"
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Upper bound for draining in-flight requests on shutdown (seconds)
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL, kept secret so it never ends up in logs
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: Secret<String>,
    pub access_token_exp_secs: u64,
    pub refresh_token_exp_secs: u64,
    pub password_min_length: usize,
    pub password_require_uppercase: bool,
    pub password_require_digit: bool,
    pub password_require_special: bool,
    /// Consecutive failed logins before the account is locked
    pub max_login_attempts: u32,
    pub login_lockout_duration_secs: u64,
    /// Take the client address from X-Forwarded-For / X-Real-IP.
    /// Only enable behind a proxy that appends to X-Forwarded-For.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// CORS origins; empty allows any origin
    pub allowed_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    pub max_body_bytes: usize,
    /// Interval of the expired refresh token and login event purge (seconds)
    pub token_purge_interval_secs: u64,
    /// Login events older than this are deleted by the purge (seconds)
    pub login_event_retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    /// Load configuration from the environment
    ///
    /// `AUTH_`-prefixed variables use `__` for nesting (`AUTH_SECURITY__JWT_SECRET`).
    /// The plain `PORT` and `DATABASE_URL` variables are honoured as well.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", DEFAULT_PORT as i64)?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.access_token_exp_secs", 900)?
            .set_default("security.refresh_token_exp_secs", 604800)?
            .set_default("security.password_min_length", 8)?
            .set_default("security.password_require_uppercase", true)?
            .set_default("security.password_require_digit", true)?
            .set_default("security.password_require_special", false)?
            .set_default("security.max_login_attempts", 5)?
            .set_default("security.login_lockout_duration_secs", 900)?
            .set_default("security.trust_proxy", false)?
            .set_default("http.allowed_origins", Vec::<String>::new())?
            .set_default("http.max_body_bytes", 100 * 1024)?
            .set_default("http.token_purge_interval_secs", 3600)?
            .set_default("http.login_event_retention_secs", 90 * 86400)?
            .add_source(
                Environment::with_prefix("AUTH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("http.allowed_origins"),
            );

        let port = match std::env::var("PORT") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Message(format!("Invalid PORT: {}", raw)))?,
            ),
            Err(_) => None,
        };
        settings = settings.set_override_option("server.port", port.map(i64::from))?;

        if std::env::var("AUTH_DATABASE__URL").is_err() {
            settings = settings.set_override_option("database.url", std::env::var("DATABASE_URL").ok())?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// `host:port` string handed to the TCP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.security.access_token_exp_secs < 60 || self.security.access_token_exp_secs > 86400 {
            return Err(ConfigError::Message(
                "access_token_exp_secs must be between 60 and 86400 (1 minute to 24 hours)"
                    .to_string(),
            ));
        }

        if self.security.refresh_token_exp_secs < 3600
            || self.security.refresh_token_exp_secs > 2592000
        {
            return Err(ConfigError::Message(
                "refresh_token_exp_secs must be between 3600 and 2592000 (1 hour to 30 days)"
                    .to_string(),
            ));
        }

        if self.security.password_min_length < 6 || self.security.password_min_length > 128 {
            return Err(ConfigError::Message(
                "password_min_length must be between 6 and 128".to_string(),
            ));
        }

        if self.security.max_login_attempts < 1 || self.security.max_login_attempts > 20 {
            return Err(ConfigError::Message(
                "max_login_attempts must be between 1 and 20".to_string(),
            ));
        }

        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::Message("max_body_bytes must be greater than 0".to_string()));
        }

        if self.http.token_purge_interval_secs == 0 {
            return Err(ConfigError::Message(
                "token_purge_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.http.login_event_retention_secs < 86400 {
            return Err(ConfigError::Message(
                "login_event_retention_secs must be at least 86400 (1 day)".to_string(),
            ));
        }

        Ok(())
    }
}
