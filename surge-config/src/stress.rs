//! Named test configurations and user behaviour profiles

use crate::duration::RunTime;
use crate::error::{ConfigError, ConfigResult};
use crate::validation::{
    validate_positive, validate_probability, validate_range, validate_required_string,
    Validatable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment variable selecting the user behaviour
pub const BEHAVIOR_ENV_VAR: &str = "USER_BEHAVIOR_TYPE";

/// Behaviour used when neither the environment nor the test names one
pub const DEFAULT_BEHAVIOR: &str = "normal_user";

/// Contents of `stress_test_config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestConfig {
    #[serde(default)]
    pub test_configurations: BTreeMap<String, TestConfiguration>,

    #[serde(default)]
    pub user_behavior: BTreeMap<String, UserBehavior>,

    /// Default user class weights for tests that do not set their own
    #[serde(default)]
    pub user_classes: UserClassWeights,
}

/// One named load test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub users: u32,

    pub spawn_rate: SpawnRate,

    pub duration: RunTime,

    #[serde(default = "default_behavior_name")]
    pub user_behavior: String,

    /// Website profile this test is meant for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_classes: Option<UserClassWeights>,
}

/// How a simulated visitor paces itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehavior {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub wait_time_min: f64,
    pub wait_time_max: f64,
    pub reading_time_min: f64,
    pub reading_time_max: f64,
    pub search_probability: f64,
}

/// Relative weights of the user classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserClassWeights {
    pub normal: u32,
    pub active: u32,
    pub power: u32,
    pub browser: u32,
    pub mobile: u32,
}

impl Default for UserClassWeights {
    fn default() -> Self {
        Self {
            normal: 0,
            active: 16,
            power: 0,
            browser: 0,
            mobile: 0,
        }
    }
}

impl UserClassWeights {
    /// Sum of all weights; `None` when it does not fit in a `u32`
    pub fn total(&self) -> Option<u32> {
        [self.normal, self.active, self.power, self.browser, self.mobile]
            .into_iter()
            .try_fold(0u32, u32::checked_add)
    }
}

impl Validatable for UserClassWeights {
    fn validate(&self) -> ConfigResult<()> {
        let total = self.total().ok_or_else(|| ConfigError::DomainError {
            domain: self.domain_name(),
            message: format!("sum of user class weights exceeds {}", u32::MAX),
        })?;
        validate_positive(total, "sum of user class weights", &self.domain_name())
    }

    fn domain_name(&self) -> String {
        "user_classes".to_string()
    }
}

/// Users started per second.
///
/// Whole numbers print without a fractional part so `5` round-trips as `5`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpawnRate(pub f64);

impl SpawnRate {
    pub fn per_second(self) -> f64 {
        self.0
    }
}

impl fmt::Display for SpawnRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0.abs() < 1e15 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl StressTestConfig {
    /// Built-in configuration used when no file is present
    pub fn builtin() -> Self {
        let tests = [
            ("light_stress", "Light load test", 5, 1.0, ("1m", 60), "normal_user"),
            ("medium_stress", "Medium load test", 25, 2.0, ("5m", 300), "active_user"),
            ("heavy_stress", "Heavy load test", 50, 5.0, ("10m", 600), "power_user"),
        ];
        let behaviors = [
            ("normal_user", "Typical visitor", 2.0, 5.0, 3.0, 8.0, 0.3),
            ("active_user", "Frequent searcher", 1.0, 3.0, 2.0, 5.0, 0.5),
            ("power_user", "Rapid, focused visitor", 0.5, 2.0, 1.0, 3.0, 0.7),
        ];

        let test_configurations = tests
            .into_iter()
            .map(|(key, description, users, rate, duration, behavior)| {
                let config = TestConfiguration {
                    name: key.to_string(),
                    description: description.to_string(),
                    users,
                    spawn_rate: SpawnRate(rate),
                    duration: RunTime::written(duration.0, duration.1),
                    user_behavior: behavior.to_string(),
                    profile: None,
                    user_classes: None,
                };
                (key.to_string(), config)
            })
            .collect();

        let user_behavior = behaviors
            .into_iter()
            .map(|(key, description, wmin, wmax, rmin, rmax, search)| {
                let behavior = UserBehavior {
                    name: key.to_string(),
                    description: description.to_string(),
                    wait_time_min: wmin,
                    wait_time_max: wmax,
                    reading_time_min: rmin,
                    reading_time_max: rmax,
                    search_probability: search,
                };
                (key.to_string(), behavior)
            })
            .collect();

        Self {
            test_configurations,
            user_behavior,
            user_classes: UserClassWeights::default(),
        }
    }

    pub fn test(&self, name: &str) -> ConfigResult<&TestConfiguration> {
        self.test_configurations
            .get(name)
            .ok_or_else(|| ConfigError::not_found("Test", name, self.test_configurations.keys()))
    }

    pub fn behavior(&self, name: &str) -> ConfigResult<&UserBehavior> {
        self.user_behavior
            .get(name)
            .ok_or_else(|| ConfigError::not_found("Behavior", name, self.user_behavior.keys()))
    }

    /// Behaviour for a test: explicit name, then `USER_BEHAVIOR_TYPE`, then the test's own.
    pub fn behavior_for(
        &self,
        test: &TestConfiguration,
        explicit: Option<&str>,
    ) -> ConfigResult<&UserBehavior> {
        self.behavior(&Self::behavior_name_for(test, explicit))
    }

    /// Name [`behavior_for`](Self::behavior_for) looks up
    pub fn behavior_name_for(test: &TestConfiguration, explicit: Option<&str>) -> String {
        let env_choice = std::env::var(BEHAVIOR_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        explicit
            .map(str::to_string)
            .or(env_choice)
            .unwrap_or_else(|| test.user_behavior.clone())
    }

    /// Class weights for a test, falling back to the file-level defaults
    pub fn class_weights_for<'a>(&'a self, test: &'a TestConfiguration) -> &'a UserClassWeights {
        test.user_classes.as_ref().unwrap_or(&self.user_classes)
    }

    /// Check every entry, collecting all problems
    pub fn violations(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        for (key, test) in &self.test_configurations {
            problems.extend(test.violations(key));
            if !self.user_behavior.contains_key(&test.user_behavior) {
                problems.push(ConfigError::DomainError {
                    domain: format!("test_configurations.{}", key),
                    message: format!("unknown user_behavior '{}'", test.user_behavior),
                });
            }
            if let Err(e) = self.class_weights_for(test).validate() {
                problems.push(e);
            }
        }
        for behavior in self.user_behavior.values() {
            if let Err(e) = behavior.validate() {
                problems.push(e);
            }
        }
        problems
    }
}

impl Default for StressTestConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Validatable for StressTestConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.violations().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    fn domain_name(&self) -> String {
        "stress_test_config".to_string()
    }
}

impl TestConfiguration {
    fn violations(&self, key: &str) -> Vec<ConfigError> {
        let domain = format!("test_configurations.{}", key);
        [
            validate_required_string(&self.name, "name", &domain),
            validate_positive(self.users, "users", &domain),
            validate_positive(self.spawn_rate, "spawn_rate", &domain),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}

impl Validatable for TestConfiguration {
    fn validate(&self) -> ConfigResult<()> {
        match self.violations(&self.name).into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    fn domain_name(&self) -> String {
        format!("test_configurations.{}", self.name)
    }
}

impl Validatable for UserBehavior {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        validate_range(self.wait_time_min, self.wait_time_max, "wait_time", &domain)?;
        validate_range(
            self.reading_time_min,
            self.reading_time_max,
            "reading_time",
            &domain,
        )?;
        validate_probability(self.search_probability, "search_probability", &domain)?;
        Ok(())
    }

    fn domain_name(&self) -> String {
        format!("user_behavior.{}", self.name)
    }
}

fn default_behavior_name() -> String {
    DEFAULT_BEHAVIOR.to_string()
}
