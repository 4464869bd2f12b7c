use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub discord_token: String,
    #[serde(default)]
    pub fluxer_token: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KvConfig {
    #[serde(default = "default_kv_url")]
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: default_kv_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Deliveries allowed per channel within one rate window.
    #[serde(default = "default_rate_limit_per_channel")]
    pub rate_limit_per_channel: u32,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    /// Lifetime of a loop-filter fingerprint.
    #[serde(default = "default_loop_hash_ttl")]
    pub loop_hash_ttl: u64,
    /// Lifetime of the edit-workaround tracker keys.
    #[serde(default = "default_edit_update_ttl_seconds")]
    pub edit_update_ttl_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_channel: default_rate_limit_per_channel(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            loop_hash_ttl: default_loop_hash_ttl(),
            edit_update_ttl_seconds: default_edit_update_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerSettings {
    /// Minimum calls in the rolling window before the breaker may open.
    #[serde(default = "default_cb_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cb_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_cb_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_cb_failure_threshold(),
            reset_timeout_ms: default_cb_reset_timeout_ms(),
            call_timeout_seconds: default_cb_call_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Base URL for jump links into Fluxer's web client.
    #[serde(default = "default_fluxer_web_base_url")]
    pub fluxer_web_base_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            bind_address: default_bind_address(),
            admin_token: None,
            fluxer_web_base_url: default_fluxer_web_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        if Path::new(&config_path).exists() {
            Self::load_from_file(&config_path)
        } else {
            // Env-only deployments carry no config file at all.
            let mut config: Config = serde_yaml::from_str("{}")?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DISCORD_TOKEN") {
            self.auth.discord_token = value;
        }
        if let Ok(value) = std::env::var("FLUXER_TOKEN") {
            self.auth.fluxer_token = value;
        }
        if let Ok(value) = std::env::var("DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Ok(value) = std::env::var("KV_URL") {
            self.kv.url = value;
        }
        if let Ok(value) = parse_env("RATE_LIMIT_PER_CHANNEL") {
            self.limits.rate_limit_per_channel = value;
        }
        if let Ok(value) = parse_env("RATE_LIMIT_WINDOW_SECONDS") {
            self.limits.rate_limit_window_seconds = value;
        }
        if let Ok(value) = parse_env("LOOP_HASH_TTL") {
            self.limits.loop_hash_ttl = value;
        }
        if let Ok(value) = parse_env("EDIT_UPDATE_TTL_SECONDS") {
            self.limits.edit_update_ttl_seconds = value;
        }
        if let Ok(value) = parse_env("CB_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = value;
        }
        if let Ok(value) = parse_env("CB_RESET_TIMEOUT_MS") {
            self.breaker.reset_timeout_ms = value;
        }
        if let Ok(value) = std::env::var("WEB_BASE_URL") {
            self.web.fluxer_web_base_url = value;
        }
        if let Ok(value) = std::env::var("ADMIN_TOKEN") {
            self.web.admin_token = Some(value);
        }
        if let Ok(value) = std::env::var("LOG_LEVEL") {
            self.logging.level = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        super::validator::validate(self)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<T, ()> {
    std::env::var(name).map_err(|_| ())?.parse().map_err(|_| ())
}

fn default_kv_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_rate_limit_per_channel() -> u32 {
    5
}

fn default_rate_limit_window_seconds() -> u64 {
    2
}

fn default_loop_hash_ttl() -> u64 {
    10
}

fn default_edit_update_ttl_seconds() -> u64 {
    604_800
}

fn default_cb_failure_threshold() -> u32 {
    10
}

fn default_cb_reset_timeout_ms() -> u64 {
    60_000
}

fn default_cb_call_timeout_seconds() -> u64 {
    15
}

fn default_web_port() -> u16 {
    9105
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_fluxer_web_base_url() -> String {
    "https://fluxer.app".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
