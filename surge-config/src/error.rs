//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading or writing a configuration file
    #[error("Failed to access config file: {0}")]
    FileReadError(#[from] std::io::Error),

    /// Required configuration file is missing
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// JSON parsing error
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvError(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    /// Named entry lookup failed
    #[error("{kind} '{name}' not found. Available {kind}s: {available:?}")]
    NotFound {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },

    /// Domain-specific configuration error
    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },
}

impl ConfigError {
    pub(crate) fn not_found<'a>(
        kind: &'static str,
        name: &str,
        available: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        ConfigError::NotFound {
            kind,
            name: name.to_string(),
            available: available.into_iter().cloned().collect(),
        }
    }
}
