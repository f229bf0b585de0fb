//! HTTP error types

/// Error type for HTTP operations
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header value for {0}")]
    InvalidHeader(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl HttpError {
    /// Short failure category used when grouping failures in reports
    pub fn kind(&self) -> &'static str {
        match self {
            HttpError::NetworkError(e) if e.is_timeout() => "timeout",
            HttpError::NetworkError(e) if e.is_connect() => "connect",
            HttpError::NetworkError(e) if e.is_redirect() => "redirect",
            HttpError::NetworkError(e) if e.is_body() || e.is_decode() => "body",
            HttpError::NetworkError(_) => "request",
            HttpError::InvalidUrl(_) => "url",
            HttpError::InvalidHeader(_) => "header",
            HttpError::ConfigError(_) => "config",
        }
    }

    /// Whether retrying the request might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, HttpError::NetworkError(e) if e.is_timeout() || e.is_connect())
    }
}
