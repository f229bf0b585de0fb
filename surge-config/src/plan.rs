//! Resolution of a named test into a fully specified, immutable test profile

use crate::duration::RunTime;
use crate::error::{ConfigError, ConfigResult};
use crate::profiles::{WebsiteProfile, WebsiteProfiles};
use crate::stress::{SpawnRate, StressTestConfig, UserBehavior, UserClassWeights};
use crate::validation::{validate_enum_choice, validate_positive, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable selecting realistic or stress pacing
pub const TEST_MODE_ENV_VAR: &str = "TEST_MODE";

/// Pacing mode of virtual users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Users pause to read pages
    #[default]
    Realistic,
    /// Users skip reading pauses
    Stress,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Realistic => "realistic",
            TestMode::Stress => "stress",
        }
    }

    /// Mode from `TEST_MODE`, defaulting to realistic
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var(TEST_MODE_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => value
                .parse()
                .map_err(|e: ConfigError| ConfigError::EnvError(e.to_string())),
            _ => Ok(TestMode::default()),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_enum_choice(s.trim(), &["realistic", "stress"], TEST_MODE_ENV_VAR, "test_mode")?;
        if s.trim().eq_ignore_ascii_case("stress") {
            Ok(TestMode::Stress)
        } else {
            Ok(TestMode::Realistic)
        }
    }
}

/// Launcher presets mapping to named tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Quick,
    Full,
    Stress,
}

impl RunMode {
    pub fn test_name(&self) -> &'static str {
        match self {
            RunMode::Quick => "light_stress",
            RunMode::Full => "medium_stress",
            RunMode::Stress => "heavy_stress",
        }
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(RunMode::Quick),
            "full" => Ok(RunMode::Full),
            "stress" => Ok(RunMode::Stress),
            other => Err(ConfigError::ValidationError(format!(
                "unknown run mode '{}'. Valid choices: quick, full, stress",
                other
            ))),
        }
    }
}

/// Per-run overrides coming from the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub host: Option<String>,
    pub behavior: Option<String>,
    pub users: Option<u32>,
    pub spawn_rate: Option<f64>,
    pub run_time: Option<RunTime>,
    pub mode: Option<TestMode>,
}

/// Everything a run needs. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestProfile {
    pub test_name: String,
    pub profile_name: String,
    pub host: String,
    pub site: WebsiteProfile,
    pub users: u32,
    pub spawn_rate: SpawnRate,
    pub run_time: RunTime,
    pub behavior: UserBehavior,
    pub class_weights: UserClassWeights,
    pub mode: TestMode,
}

impl TestProfile {
    /// Resolve `test_name` against the loaded configuration.
    ///
    /// Profile: override, then `WEBSITE_PROFILE`, then the test's own profile,
    /// then `default_profile`. Host: override, then the profile's base URL.
    pub fn resolve(
        test_name: &str,
        stress: &StressTestConfig,
        profiles: &WebsiteProfiles,
        overrides: &Overrides,
    ) -> ConfigResult<Self> {
        let test = stress.test(test_name)?;

        let (profile_name, site) =
            profiles.select_for(overrides.profile.as_deref(), test.profile.as_deref())?;

        let behavior = stress.behavior_for(test, overrides.behavior.as_deref())?;
        let mode = match overrides.mode {
            Some(mode) => mode,
            None => TestMode::from_env()?,
        };

        let resolved = Self {
            test_name: test_name.to_string(),
            profile_name: profile_name.to_string(),
            host: overrides
                .host
                .clone()
                .unwrap_or_else(|| site.base_url.clone()),
            site: site.clone(),
            users: overrides.users.unwrap_or(test.users),
            spawn_rate: overrides.spawn_rate.map(SpawnRate).unwrap_or(test.spawn_rate),
            run_time: overrides
                .run_time
                .clone()
                .unwrap_or_else(|| test.duration.clone()),
            behavior: behavior.clone(),
            class_weights: stress.class_weights_for(test).clone(),
            mode,
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

impl Validatable for TestProfile {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        validate_url(&self.host, "host", &domain)?;
        validate_positive(self.users, "users", &domain)?;
        validate_positive(self.spawn_rate, "spawn_rate", &domain)?;
        self.behavior.validate()?;
        self.class_weights.validate()?;
        Ok(())
    }

    fn domain_name(&self) -> String {
        format!("test_profile.{}", self.test_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    fn profiles() -> WebsiteProfiles {
        serde_json::from_str(
            r#"{
                "default_profile": "prod",
                "profiles": {
                    "prod": {"name": "Production", "base_url": "https://www.example.org"},
                    "local": {"name": "Local", "base_url": "http://localhost:8080"}
                }
            }"#,
        )
        .unwrap()
    }

    const CLEAN: [(&str, Option<&str>); 3] = [
        ("WEBSITE_PROFILE", None),
        ("USER_BEHAVIOR_TYPE", None),
        ("TEST_MODE", None),
    ];

    #[test]
    fn test_resolve_from_configuration() {
        with_vars(CLEAN, || {
            let profile = TestProfile::resolve(
                "medium_stress",
                &StressTestConfig::builtin(),
                &profiles(),
                &Overrides::default(),
            )
            .unwrap();
            assert_eq!(profile.users, 25);
            assert_eq!(profile.spawn_rate, SpawnRate(2.0));
            assert_eq!(profile.run_time.as_str(), "5m");
            assert_eq!(profile.host, "https://www.example.org");
            assert_eq!(profile.behavior.name, "active_user");
            assert_eq!(profile.mode, TestMode::Realistic);
        });
    }

    #[test]
    fn test_overrides_win() {
        with_vars(CLEAN, || {
            let overrides = Overrides {
                profile: Some("local".to_string()),
                users: Some(3),
                spawn_rate: Some(0.5),
                run_time: Some("30s".parse().unwrap()),
                mode: Some(TestMode::Stress),
                ..Default::default()
            };
            let profile = TestProfile::resolve(
                "light_stress",
                &StressTestConfig::builtin(),
                &profiles(),
                &overrides,
            )
            .unwrap();
            assert_eq!(profile.profile_name, "local");
            assert_eq!(profile.host, "http://localhost:8080");
            assert_eq!(profile.users, 3);
            assert_eq!(profile.spawn_rate.to_string(), "0.5");
            assert_eq!(profile.mode, TestMode::Stress);
        });
    }

    #[test]
    fn test_environment_selection() {
        with_vars(
            [
                ("WEBSITE_PROFILE", Some("local")),
                ("USER_BEHAVIOR_TYPE", Some("power_user")),
                ("TEST_MODE", Some("stress")),
            ],
            || {
                let profile = TestProfile::resolve(
                    "light_stress",
                    &StressTestConfig::builtin(),
                    &profiles(),
                    &Overrides::default(),
                )
                .unwrap();
                assert_eq!(profile.profile_name, "local");
                assert_eq!(profile.behavior.name, "power_user");
                assert_eq!(profile.mode, TestMode::Stress);
            },
        );
    }

    #[test]
    fn test_test_bound_profile_used_without_env() {
        let mut stress = StressTestConfig::builtin();
        stress
            .test_configurations
            .get_mut("light_stress")
            .unwrap()
            .profile = Some("local".to_string());
        with_vars(CLEAN, || {
            let profile =
                TestProfile::resolve("light_stress", &stress, &profiles(), &Overrides::default())
                    .unwrap();
            assert_eq!(profile.profile_name, "local");
        });
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        with_vars(CLEAN, || {
            let stress = StressTestConfig::builtin();
            assert!(
                TestProfile::resolve("nope", &stress, &profiles(), &Overrides::default()).is_err()
            );

            let overrides = Overrides {
                host: Some("not a url".to_string()),
                ..Default::default()
            };
            assert!(TestProfile::resolve("light_stress", &stress, &profiles(), &overrides).is_err());

            let overrides = Overrides {
                users: Some(0),
                ..Default::default()
            };
            assert!(TestProfile::resolve("light_stress", &stress, &profiles(), &overrides).is_err());
        });
        with_vars([("TEST_MODE", Some("chaos"))], || {
            assert!(TestMode::from_env().is_err());
        });
    }

    #[test]
    fn test_run_modes() {
        assert_eq!("quick".parse::<RunMode>().unwrap().test_name(), "light_stress");
        assert_eq!("FULL".parse::<RunMode>().unwrap().test_name(), "medium_stress");
        assert_eq!("stress".parse::<RunMode>().unwrap().test_name(), "heavy_stress");
        assert!("web".parse::<RunMode>().is_err());
    }
}
