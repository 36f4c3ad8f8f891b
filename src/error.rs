use thiserror::Error;

use crate::dns::ParseError;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Config file parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid threshold percentage {0} (must be 0-100)")]
    InvalidThreshold(u16),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Backend type '{0}' is not enabled or not supported")]
    UnknownBackend(String),

    #[error("Duplicate pool id: {0}")]
    DuplicatePool(String),

    #[error("Unknown TSIG key: {0}")]
    UnknownTsigKey(String),

    #[error("Invalid TSIG key {name}: {reason}")]
    InvalidTsigKey { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PoolManagerError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Status store error: {0}")]
    StatusStore(String),

    #[error("Central store error: {0}")]
    Central(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("TSIG error: {0}")]
    Tsig(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PoolManagerError {
    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        PoolManagerError::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for PoolManagerError {
    fn from(err: std::io::Error) -> Self {
        PoolManagerError::Io(err.to_string())
    }
}

impl From<ParseError> for PoolManagerError {
    fn from(err: ParseError) -> Self {
        PoolManagerError::Parse(err.to_string())
    }
}

impl From<redis::RedisError> for PoolManagerError {
    fn from(err: redis::RedisError) -> Self {
        PoolManagerError::Redis(err.to_string())
    }
}

impl From<sqlx::Error> for PoolManagerError {
    fn from(err: sqlx::Error) -> Self {
        PoolManagerError::Sql(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PoolManagerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PoolManagerError::Sql(err.to_string())
    }
}

impl From<reqwest::Error> for PoolManagerError {
    fn from(err: reqwest::Error) -> Self {
        PoolManagerError::Io(err.to_string())
    }
}

impl From<prometheus::Error> for PoolManagerError {
    fn from(err: prometheus::Error) -> Self {
        PoolManagerError::Metrics(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PoolManagerError>;
