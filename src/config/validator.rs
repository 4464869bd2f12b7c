use super::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub(super) fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.auth.discord_token.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "auth.discord_token cannot be empty".to_string(),
        ));
    }

    if config.auth.fluxer_token.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "auth.fluxer_token cannot be empty".to_string(),
        ));
    }

    if config.database.connection_string().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "database connection string cannot be empty".to_string(),
        ));
    }

    if config.kv.url.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "kv.url cannot be empty".to_string(),
        ));
    }

    if config.web.port == 0 {
        return Err(ConfigError::InvalidConfig(
            "web.port must be between 1 and 65535".to_string(),
        ));
    }

    if let Err(e) = url::Url::parse(&config.web.fluxer_web_base_url) {
        return Err(ConfigError::InvalidConfig(format!(
            "web.fluxer_web_base_url is not a valid url: {e}"
        )));
    }

    if config.limits.rate_limit_per_channel == 0 {
        return Err(ConfigError::InvalidConfig(
            "limits.rate_limit_per_channel must be at least 1".to_string(),
        ));
    }

    Ok(())
}
