//! Translation of a named test into a command line for the `surge` binary

use crate::error::ConfigResult;
use crate::profiles::{WebsiteProfiles, PROFILE_ENV_VAR};
use crate::stress::{StressTestConfig, BEHAVIOR_ENV_VAR};
use crate::validation::{validate_url, Validatable};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::Path;

/// Binary the invocation targets
pub const PROGRAM: &str = "surge";

/// Report file prefix: `<dir>/<test>_<YYYYmmdd_HHMMSS>`
pub fn report_prefix(reports_dir: &Path, test_name: &str, at: DateTime<Local>) -> String {
    reports_dir
        .join(format!("{}_{}", test_name, at.format("%Y%m%d_%H%M%S")))
        .to_string_lossy()
        .into_owned()
}

/// A ready-to-run command line plus the environment it expects
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub report_prefix: String,
}

impl Invocation {
    /// Build the invocation for `test_name`.
    ///
    /// Profile and behaviour are chosen exactly as [`TestProfile::resolve`]
    /// chooses them, environment included, so the printed command runs the same
    /// test. Host: `host_override`, then the profile's base URL. Values are
    /// rendered as written in the configuration files.
    ///
    /// [`TestProfile::resolve`]: crate::plan::TestProfile::resolve
    pub fn for_test(
        test_name: &str,
        stress: &StressTestConfig,
        profiles: &WebsiteProfiles,
        profile: Option<&str>,
        host_override: Option<&str>,
        reports_dir: &Path,
        at: DateTime<Local>,
    ) -> ConfigResult<Self> {
        let test = stress.test(test_name)?;
        test.validate()?;

        let (profile_name, site) = profiles.select_for(profile, test.profile.as_deref())?;
        let behavior = StressTestConfig::behavior_name_for(test, None);
        stress.behavior(&behavior)?;
        let host = host_override.unwrap_or(&site.base_url);
        validate_url(host, "host", "invocation")?;

        let prefix = report_prefix(reports_dir, test_name, at);
        let users = test.users.to_string();
        let spawn_rate = test.spawn_rate.to_string();
        let args = [
            "run",
            test_name,
            "-u",
            users.as_str(),
            "-r",
            spawn_rate.as_str(),
            "-t",
            test.duration.as_str(),
            "--host",
            host,
            "--profile",
            profile_name,
            "--behavior",
            behavior.as_str(),
            "--csv",
            prefix.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let env = vec![
            (PROFILE_ENV_VAR.to_string(), profile_name.to_string()),
            (BEHAVIOR_ENV_VAR.to_string(), behavior.clone()),
            ("TEST_NAME".to_string(), test_name.to_string()),
            (
                "REPORTS_DIR".to_string(),
                reports_dir.to_string_lossy().into_owned(),
            ),
        ];

        Ok(Self {
            program: PROGRAM.to_string(),
            args,
            env,
            report_prefix: prefix,
        })
    }

    /// Value following `flag`, if present
    pub fn flag(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }

    /// `argv[0]` followed by the arguments
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(self.args.iter());
        for (index, word) in words.enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            if word.is_empty() || word.contains(|c: char| c.is_whitespace() || c == '\'') {
                write!(f, "'{}'", word.replace('\'', r"'\''"))?;
            } else {
                f.write_str(word)?;
            }
        }
        Ok(())
    }
}
