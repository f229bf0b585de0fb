//! Tracing subscriber setup

use crate::cli::LogFormat;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`
pub const LOG_ENV_VAR: &str = "SURGE_LOG";

/// Filter from `--log-level`, then `SURGE_LOG`, then `RUST_LOG`, then `info`
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays usable
/// for command output; a second call is a no-op.
pub fn init_tracing(log_level: Option<&str>, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_ok() {
        debug!("Tracing initialized ({:?} format)", format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    #[test]
    fn test_filter_precedence() {
        with_vars(
            [(LOG_ENV_VAR, Some("warn")), ("RUST_LOG", Some("trace"))],
            || {
                assert_eq!(env_filter(Some("debug")).to_string(), "debug");
                assert_eq!(env_filter(None).to_string(), "warn");
            },
        );
        with_vars(
            [(LOG_ENV_VAR, None), ("RUST_LOG", Some("error"))],
            || assert_eq!(env_filter(None).to_string(), "error"),
        );
        with_vars([(LOG_ENV_VAR, None::<&str>), ("RUST_LOG", None)], || {
            assert_eq!(env_filter(None).to_string(), "info")
        });
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_tracing(Some("info"), LogFormat::Text);
        init_tracing(Some("debug"), LogFormat::Json);
    }
}
