//! Configuration loading and environment variable handling

use crate::error::{ConfigError, ConfigResult};
use crate::http::HttpConfig;
use crate::profiles::WebsiteProfiles;
use crate::stress::StressTestConfig;
use crate::validation::Validatable;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PROFILES_FILE: &str = "website_profiles.json";
pub const STRESS_FILE: &str = "stress_test_config.json";
pub const HTTP_FILE: &str = "http.json";

/// Prefix of the HTTP session override variables, e.g. `SURGE_HTTP_TIMEOUT`
pub const ENV_PREFIX: &str = "SURGE";

/// Environment variable naming the reports directory
pub const REPORTS_DIR_ENV_VAR: &str = "REPORTS_DIR";

/// Everything loaded from the configuration directory
#[derive(Debug, Clone)]
pub struct SurgeConfig {
    pub profiles: WebsiteProfiles,
    pub profiles_path: PathBuf,
    pub stress: StressTestConfig,
    pub http: HttpConfig,
    pub reports_dir: PathBuf,
}

impl SurgeConfig {
    /// All integrity problems across profiles, tests and session settings
    pub fn violations(&self) -> Vec<ConfigError> {
        let mut problems = self.profiles.violations();
        problems.extend(self.stress.violations());
        if let Err(e) = self.http.validate() {
            problems.push(e);
        }
        problems
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Directory holding the JSON files
    config_dir: PathBuf,
    /// Directory searched when a file is missing from `config_dir`
    fallback_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader reading `./config`, falling back to the working directory
    pub fn new() -> Self {
        Self::with_dir("config")
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            fallback_dir: PathBuf::from("."),
        }
    }

    /// Override the fallback directory
    pub fn with_fallback(mut self, fallback_dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = fallback_dir.into();
        self
    }

    /// Load and validate all configuration
    pub fn load(&self) -> ConfigResult<SurgeConfig> {
        let config = self.load_unvalidated()?;
        if let Some(problem) = config.violations().into_iter().next() {
            return Err(problem);
        }
        Ok(config)
    }

    /// Load without validation, so that every problem can be reported at once
    pub fn load_unvalidated(&self) -> ConfigResult<SurgeConfig> {
        let (profiles, profiles_path) = self.load_profiles()?;
        let stress = self.load_stress()?;
        let mut http = self.load_http()?;
        self.apply_http_overrides(&mut http)?;

        Ok(SurgeConfig {
            profiles,
            profiles_path,
            stress,
            http,
            reports_dir: reports_dir_from_env(),
        })
    }

    /// Website profiles; the file is required
    pub fn load_profiles(&self) -> ConfigResult<(WebsiteProfiles, PathBuf)> {
        let path = self.locate(PROFILES_FILE).ok_or_else(|| {
            ConfigError::FileNotFound(self.config_dir.join(PROFILES_FILE).display().to_string())
        })?;
        let profiles = read_json(&path)?;
        Ok((profiles, path))
    }

    /// Stress test configuration; built-in defaults when the file is missing
    pub fn load_stress(&self) -> ConfigResult<StressTestConfig> {
        match self.locate(STRESS_FILE) {
            Some(path) => read_json(&path),
            None => {
                warn!(
                    "{} not found in {}, using built-in test configurations",
                    STRESS_FILE,
                    self.config_dir.display()
                );
                Ok(StressTestConfig::builtin())
            }
        }
    }

    /// HTTP session settings; defaults when the file is missing
    pub fn load_http(&self) -> ConfigResult<HttpConfig> {
        match self.locate(HTTP_FILE) {
            Some(path) => read_json(&path),
            None => Ok(HttpConfig::default()),
        }
    }

    /// Persist profiles (used when switching the default profile)
    pub fn save_profiles(&self, profiles: &WebsiteProfiles, path: &Path) -> ConfigResult<()> {
        profiles.validate()?;
        let mut content = serde_json::to_string_pretty(profiles)?;
        content.push('\n');
        std::fs::write(path, content)?;
        info!("Wrote website profiles to {}", path.display());
        Ok(())
    }

    fn locate(&self, file_name: &str) -> Option<PathBuf> {
        [&self.config_dir, &self.fallback_dir]
            .into_iter()
            .map(|dir| dir.join(file_name))
            .find(|path| path.is_file())
    }

    /// Apply HTTP config overrides
    fn apply_http_overrides(&self, config: &mut HttpConfig) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("HTTP_TIMEOUT") {
            let seconds: f64 = timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_TIMEOUT: {}", e)))?;
            config.timeout = std::time::Duration::try_from_secs_f64(seconds)
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_TIMEOUT: {}", e)))?;
        }

        if let Ok(user_agent) = self.get_env_var("HTTP_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(verify_ssl) = self.get_env_var("HTTP_VERIFY_SSL") {
            config.verify_ssl = verify_ssl
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_VERIFY_SSL: {}", e)))?;
        }

        if let Ok(retries) = self.get_env_var("HTTP_MAX_RETRIES") {
            config.retry.max_retries = retries
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_MAX_RETRIES: {}", e)))?;
        }

        if let Ok(limit) = self.get_env_var("MAX_IN_FLIGHT") {
            let limit: usize = limit
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_IN_FLIGHT: {}", e)))?;
            config.max_in_flight = Some(limit);
        }

        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", ENV_PREFIX, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports directory from `REPORTS_DIR`, defaulting to `reports`
pub fn reports_dir_from_env() -> PathBuf {
    std::env::var(REPORTS_DIR_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("reports"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    debug!("Reading {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use temp_env::with_vars;
    use tempfile::TempDir;

    const PROFILES: &str = r#"{
        "default_profile": "prod",
        "profiles": {
            "prod": {"name": "Production", "base_url": "https://www.example.org"},
            "local": {"name": "Local", "base_url": "http://localhost:8080"}
        }
    }"#;

    const CLEAN: [(&str, Option<&str>); 5] = [
        ("SURGE_HTTP_TIMEOUT", None),
        ("SURGE_HTTP_USER_AGENT", None),
        ("SURGE_HTTP_VERIFY_SSL", None),
        ("SURGE_HTTP_MAX_RETRIES", None),
        ("SURGE_MAX_IN_FLIGHT", None),
    ];

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_missing_stress_file_uses_builtin() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), PROFILES_FILE, PROFILES);

        let loader = ConfigLoader::with_dir(dir.path()).with_fallback(dir.path().join("none"));
        with_vars(CLEAN, || {
            let config = loader.load().unwrap();
            assert_eq!(config.stress, StressTestConfig::builtin());
            assert_eq!(config.http, HttpConfig::default());
        });
    }

    #[test]
    fn test_missing_profiles_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(dir.path()).with_fallback(dir.path());
        assert!(matches!(loader.load(), Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_fallback_directory() {
        let root = TempDir::new().unwrap();
        write(root.path(), PROFILES_FILE, PROFILES);

        let loader = ConfigLoader::with_dir(root.path().join("config")).with_fallback(root.path());
        let (profiles, path) = loader.load_profiles().unwrap();
        assert_eq!(profiles.default_profile, "prod");
        assert_eq!(path, root.path().join(PROFILES_FILE));
    }

    #[test]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), PROFILES_FILE, PROFILES);

        with_vars(
            [
                ("SURGE_HTTP_TIMEOUT", Some("5")),
                ("SURGE_HTTP_MAX_RETRIES", Some("0")),
                ("SURGE_MAX_IN_FLIGHT", Some("64")),
                ("REPORTS_DIR", Some("out/reports")),
            ],
            || {
                let config = ConfigLoader::with_dir(dir.path()).load().unwrap();
                assert_eq!(config.http.timeout, Duration::from_secs(5));
                assert_eq!(config.http.retry.max_retries, 0);
                assert_eq!(config.http.max_in_flight, Some(64));
                assert_eq!(config.reports_dir, PathBuf::from("out/reports"));
            },
        );

        with_vars([("SURGE_HTTP_TIMEOUT", Some("soon"))], || {
            let result = ConfigLoader::with_dir(dir.path()).load();
            assert!(matches!(result, Err(ConfigError::EnvError(_))));
        });
    }

    #[test]
    fn test_save_profiles_round_trips() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), PROFILES_FILE, PROFILES);
        let loader = ConfigLoader::with_dir(dir.path());

        let (mut profiles, path) = loader.load_profiles().unwrap();
        profiles.set_default_profile("local").unwrap();
        loader.save_profiles(&profiles, &path).unwrap();

        let (reloaded, _) = loader.load_profiles().unwrap();
        assert_eq!(reloaded.default_profile, "local");
        assert_eq!(reloaded.profiles, profiles.profiles);
    }

    #[test]
    fn test_invalid_file_reports_all_violations() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            PROFILES_FILE,
            r#"{"default_profile": "ghost", "profiles": {"bad": {"name": "Bad", "base_url": "nope"}}}"#,
        );
        let loader = ConfigLoader::with_dir(dir.path());
        with_vars(CLEAN, || {
            assert!(loader.load().is_err());
            let config = loader.load_unvalidated().unwrap();
            assert_eq!(config.violations().len(), 2);
        });
    }
}
