//! Run-time spans and serde helpers for durations

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Parse a span like `"300"`, `"30s"`, `"5m"` or `"1h30m"`.
///
/// A bare number is taken as seconds.
pub fn parse_span(text: &str) -> Result<Duration, ConfigError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::ValidationError(
            "duration cannot be empty".to_string(),
        ));
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(trimmed).map_err(|e| {
        ConfigError::ValidationError(format!("invalid duration '{}': {}", trimmed, e))
    })
}

/// A run duration that remembers how it was written.
///
/// The original text is kept so that launch commands reproduce the
/// configuration exactly (`5m` stays `5m`, not `300s`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTime {
    raw: String,
    span: Duration,
}

impl RunTime {
    pub fn from_secs(seconds: u64) -> Self {
        Self {
            raw: format!("{}s", seconds),
            span: Duration::from_secs(seconds),
        }
    }

    pub(crate) fn written(raw: &str, seconds: u64) -> Self {
        Self {
            raw: raw.to_string(),
            span: Duration::from_secs(seconds),
        }
    }

    /// Text as written in the configuration
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_duration(&self) -> Duration {
        self.span
    }
}

impl FromStr for RunTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let span = parse_span(s)?;
        if span.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "duration '{}' must be greater than 0",
                s
            )));
        }
        Ok(Self {
            raw: s.trim().to_string(),
            span,
        })
    }
}

impl fmt::Display for RunTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for RunTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RunTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Seconds(u64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Seconds(seconds) => seconds.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helper module for Duration serialization as (fractional) seconds
pub mod serde_secs_f64 {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
