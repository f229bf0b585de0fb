//! CLI argument parsing definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use surge_config::{RunMode, RunTime, TestMode};

#[derive(Parser, Debug)]
#[command(name = "surge", author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding website_profiles.json and stress_test_config.json
    #[arg(long, value_name = "DIR", global = true, default_value = "config")]
    pub config_dir: PathBuf,

    /// Set the log level (trace, debug, info, warn, error) or a full filter
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(
        long,
        value_enum,
        global = true,
        env = "SURGE_LOG_FORMAT",
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List test configurations, behaviours, user classes and website profiles
    List,

    /// Run a load test
    Run(RunArgs),

    /// Print the command line that runs a named test
    Command {
        /// Test configuration name
        test: String,

        /// Website profile to target
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,

        /// Target host, overriding the profile's base URL
        #[arg(long, value_name = "URL")]
        host: Option<String>,
    },

    /// Check every configuration file and report all problems
    Validate,

    /// Website profile management
    Profile {
        #[command(subcommand)]
        profile_cmd: ProfileCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Test configuration name
    #[arg(conflicts_with = "mode")]
    pub test: Option<String>,

    /// Preset: quick (light_stress), full (medium_stress) or stress (heavy_stress)
    #[arg(long, value_parser = parse_run_mode)]
    pub mode: Option<RunMode>,

    /// Number of concurrent users
    #[arg(short = 'u', long, value_name = "N")]
    pub users: Option<u32>,

    /// Users started per second
    #[arg(short = 'r', long, value_name = "RATE")]
    pub spawn_rate: Option<f64>,

    /// Run time, e.g. 300, 30s, 5m, 1h30m
    #[arg(short = 't', long, value_name = "TIME")]
    pub run_time: Option<RunTime>,

    /// Target host, overriding the profile's base URL
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,

    /// Website profile to target
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// User behaviour name
    #[arg(long, value_name = "NAME")]
    pub behavior: Option<String>,

    /// Pacing: realistic (reading pauses) or stress (none)
    #[arg(long, value_parser = parse_test_mode)]
    pub test_mode: Option<TestMode>,

    /// Report file prefix (defaults to <reports-dir>/<test>_<timestamp>)
    #[arg(long, value_name = "PREFIX")]
    pub csv: Option<String>,

    /// Reports directory (defaults to $REPORTS_DIR or ./reports)
    #[arg(long, value_name = "DIR")]
    pub reports_dir: Option<PathBuf>,

    /// Seconds between progress reports
    #[arg(long, value_name = "SECS", default_value_t = 5.0)]
    pub report_interval: f64,

    /// Seconds users get to finish after the run time before being aborted
    #[arg(long, value_name = "SECS", default_value_t = 30.0)]
    pub stop_timeout: f64,

    /// Seed for reproducible user choices
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,
}

impl RunArgs {
    /// Test name from the positional argument, the preset, or `quick`
    pub fn test_name(&self) -> String {
        match (&self.test, self.mode) {
            (Some(test), _) => test.clone(),
            (None, Some(mode)) => mode.test_name().to_string(),
            (None, None) => RunMode::Quick.test_name().to_string(),
        }
    }
}

fn parse_run_mode(value: &str) -> Result<RunMode, String> {
    value.parse().map_err(|e: surge_config::ConfigError| e.to_string())
}

fn parse_test_mode(value: &str) -> Result<TestMode, String> {
    value.parse().map_err(|e: surge_config::ConfigError| e.to_string())
}
