//! HTTP session configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP session settings shared by every virtual user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout
    #[serde(with = "crate::duration::serde_secs_f64", default = "default_timeout")]
    pub timeout: Duration,

    /// TCP/TLS connect timeout
    #[serde(
        with = "crate::duration::serde_secs_f64",
        default = "default_connect_timeout"
    )]
    pub connect_timeout: Duration,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether to verify TLS certificates
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Maximum number of redirects to follow
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Connection pool bounds
    #[serde(default)]
    pub pool: PoolConfig,

    /// Upper bound on requests in flight across all users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry n is `backoff_factor * 2^(n-1)` seconds
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Status codes that trigger a retry
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connections per host
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Idle connection timeout
    #[serde(
        with = "crate::duration::serde_secs_f64",
        default = "default_idle_timeout"
    )]
    pub idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            verify_ssl: true,
            max_redirects: default_max_redirects(),
            retry: RetryConfig::default(),
            pool: PoolConfig::default(),
            max_in_flight: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(16) as i32;
        let seconds = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }

    pub fn should_retry(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Validatable for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.timeout.as_secs_f64(), "timeout", &self.domain_name())?;
        validate_positive(
            self.connect_timeout.as_secs_f64(),
            "connect_timeout",
            &self.domain_name(),
        )?;
        validate_required_string(&self.user_agent, "user_agent", &self.domain_name())?;

        if let Some(limit) = self.max_in_flight {
            validate_positive(limit, "max_in_flight", &self.domain_name())?;
        }

        self.retry.validate()?;
        self.pool.validate()?;
        Ok(())
    }

    fn domain_name(&self) -> String {
        "http".to_string()
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(self.backoff_factor >= 0.0) {
            return Err(self.validation_error(format!(
                "backoff_factor must be non-negative, got {}",
                self.backoff_factor
            )));
        }
        if let Some(bad) = self
            .retry_statuses
            .iter()
            .find(|status| !(100..=599).contains(*status))
        {
            return Err(self.validation_error(format!("{} is not an HTTP status", bad)));
        }
        Ok(())
    }

    fn domain_name(&self) -> String {
        "http.retry".to_string()
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.max_idle_per_host,
            "max_idle_per_host",
            &self.domain_name(),
        )?;
        validate_positive(
            self.idle_timeout.as_secs_f64(),
            "idle_timeout",
            &self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> String {
        "http.pool".to_string()
    }
}

// Default value functions
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    concat!("surge/", env!("CARGO_PKG_VERSION"), " (load test)").to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_redirects() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.3
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_max_idle_per_host() -> usize {
    10
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}
