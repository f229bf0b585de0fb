//! Engine error types

use surge_config::ConfigError;
use surge_http::HttpError;
use thiserror::Error;

/// Errors that abort a run. Failed requests are samples, not errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP session error: {0}")]
    Http(#[from] HttpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Histogram error: {0}")]
    Histogram(String),

    #[error("Invalid run option: {0}")]
    Options(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Task failed: {0}")]
    Join(String),
}

impl From<hdrhistogram::errors::CreationError> for EngineError {
    fn from(e: hdrhistogram::errors::CreationError) -> Self {
        EngineError::Histogram(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Join(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
