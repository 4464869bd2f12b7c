pub use self::parser::{
    AuthConfig, BreakerSettings, Config, DatabaseConfig, DbType, KvConfig, LimitsConfig,
    LoggingConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
