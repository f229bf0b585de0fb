//! Command handlers

use crate::cli::RunArgs;
use anyhow::{Context, Result};
use chrono::Local;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use surge_config::{
    report_prefix, ConfigLoader, Invocation, Overrides, SurgeConfig, TestProfile,
};
use surge_engine::{ConsoleSink, FileSink, LoadTest, RunOptions, RunReport, UserClass};
use tracing::{error, info, warn};

/// Print tests, behaviours, user classes and profiles
pub fn handle_list(config: &SurgeConfig, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Test configurations:")?;
    for (key, test) in &config.stress.test_configurations {
        writeln!(
            out,
            "  {:<18} {:>4} users  {:>4}/s  {:>6}  {:<12} {}",
            key, test.users, test.spawn_rate, test.duration, test.user_behavior, test.description
        )?;
    }

    writeln!(out, "\nUser behaviours:")?;
    for (key, behavior) in &config.stress.user_behavior {
        writeln!(
            out,
            "  {:<18} wait {}-{}s  reading {}-{}s  search {:.0}%",
            key,
            behavior.wait_time_min,
            behavior.wait_time_max,
            behavior.reading_time_min,
            behavior.reading_time_max,
            behavior.search_probability * 100.0
        )?;
    }

    writeln!(out, "\nUser classes (default weights):")?;
    for class in UserClass::ALL {
        writeln!(
            out,
            "  {:<18} {}",
            class,
            class.weight_in(&config.stress.user_classes)
        )?;
    }

    writeln!(out, "\nWebsite profiles:")?;
    for (key, profile) in &config.profiles.profiles {
        let marker = if *key == config.profiles.default_profile {
            "*"
        } else {
            " "
        };
        writeln!(
            out,
            "{} {:<18} {:<32} {}",
            marker, key, profile.base_url, profile.name
        )?;
    }
    Ok(())
}

/// Print the environment and command line that run `test`
pub fn handle_command(
    config: &SurgeConfig,
    test: &str,
    profile: Option<&str>,
    host: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let invocation = Invocation::for_test(
        test,
        &config.stress,
        &config.profiles,
        profile,
        host,
        &config.reports_dir,
        Local::now(),
    )
    .with_context(|| format!("Failed to build command for test '{}'", test))?;

    for (key, value) in &invocation.env {
        writeln!(out, "export {}={}", key, value)?;
    }
    writeln!(out, "{}", invocation)?;
    Ok(())
}

/// Check every configuration property, printing all problems found
pub fn handle_validate(loader: &ConfigLoader, out: &mut impl Write) -> Result<()> {
    let config = loader
        .load_unvalidated()
        .context("Failed to load configuration")?;

    let mut problems: Vec<String> = config
        .violations()
        .iter()
        .map(ToString::to_string)
        .collect();

    let now = Local::now();
    for test_name in config.stress.test_configurations.keys() {
        for profile_name in config.profiles.profiles.keys() {
            if let Err(e) = Invocation::for_test(
                test_name,
                &config.stress,
                &config.profiles,
                Some(profile_name),
                None,
                &config.reports_dir,
                now,
            ) {
                problems.push(format!("{} on {}: {}", test_name, profile_name, e));
            }
        }
    }
    problems.dedup();

    if problems.is_empty() {
        writeln!(
            out,
            "✅ Configuration is valid ({} tests, {} profiles)",
            config.stress.test_configurations.len(),
            config.profiles.profiles.len()
        )?;
        info!("Configuration validation passed");
        return Ok(());
    }

    writeln!(out, "❌ {} configuration problem(s):", problems.len())?;
    for problem in &problems {
        writeln!(out, "  - {}", problem)?;
        error!("{}", problem);
    }
    Err(anyhow::anyhow!(
        "configuration has {} problem(s)",
        problems.len()
    ))
}

/// Rewrite `default_profile` in the profiles file
pub fn handle_profile_use(loader: &ConfigLoader, name: &str, out: &mut impl Write) -> Result<()> {
    let (mut profiles, path) = loader.load_profiles().context("Failed to load profiles")?;
    profiles.set_default_profile(name)?;
    loader
        .save_profiles(&profiles, &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    let site = profiles.default_site()?;
    writeln!(out, "Default profile is now '{}' ({})", name, site.base_url)?;
    Ok(())
}

/// Resolve the run's profile from the loaded configuration and CLI flags
pub fn resolve_run(config: &SurgeConfig, args: &RunArgs) -> Result<TestProfile> {
    let test_name = args.test_name();
    let overrides = Overrides {
        profile: args.profile.clone(),
        host: args.host.clone(),
        behavior: args.behavior.clone(),
        users: args.users,
        spawn_rate: args.spawn_rate,
        run_time: args.run_time.clone(),
        mode: args.test_mode,
    };
    TestProfile::resolve(&test_name, &config.stress, &config.profiles, &overrides)
        .with_context(|| format!("Failed to resolve test '{}'", test_name))
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        anyhow::bail!("--{} must be a positive number of seconds, got {}", flag, value);
    }
    let duration =
        Duration::try_from_secs_f64(value).with_context(|| format!("--{} is out of range", flag))?;
    if duration.is_zero() {
        anyhow::bail!("--{} of {}s rounds to zero", flag, value);
    }
    Ok(duration)
}

/// Run a load test, writing reports under the chosen prefix
pub async fn handle_run(config: &SurgeConfig, args: &RunArgs) -> Result<RunReport> {
    let profile = resolve_run(config, args)?;
    let options = RunOptions {
        report_interval: seconds(args.report_interval, "report-interval")?,
        stop_timeout: seconds(args.stop_timeout, "stop-timeout")?,
        seed: args.seed,
        ..RunOptions::default()
    };

    let reports_dir = args
        .reports_dir
        .clone()
        .unwrap_or_else(|| config.reports_dir.clone());
    let prefix = args
        .csv
        .clone()
        .unwrap_or_else(|| report_prefix(&reports_dir, &profile.test_name, Local::now()));
    let files = FileSink::create(Path::new(&prefix))
        .await
        .with_context(|| format!("Failed to prepare reports at {}", prefix))?;

    let test = LoadTest::with_session(profile, &config.http)
        .context("Failed to create HTTP session")?
        .with_options(options)
        .with_sink(ConsoleSink)
        .with_sink(files);

    let cancel = test.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping users");
            cancel.cancel();
        }
    });

    let report = test.run().await.context("Load test failed")?;
    info!("Reports: {}_*", prefix);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use std::path::PathBuf;
    use temp_env::with_vars;
    use tempfile::TempDir;

    const CLEAN: [(&str, Option<&str>); 4] = [
        ("WEBSITE_PROFILE", None),
        ("USER_BEHAVIOR_TYPE", None),
        ("TEST_MODE", None),
        ("SURGE_HTTP_TIMEOUT", None),
    ];

    fn shipped_config_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../config")
    }

    fn shipped() -> SurgeConfig {
        let dir = shipped_config_dir();
        with_vars(CLEAN, || {
            ConfigLoader::with_dir(&dir)
                .with_fallback(&dir)
                .load()
                .unwrap()
        })
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = crate::cli::Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(crate::cli::Commands::Run(args)) => args,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_list_marks_default_profile() {
        let mut out = Vec::new();
        handle_list(&shipped(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("medium_stress"));
        assert!(text.contains("active_user"));
        assert!(text.contains("* mvhs_production"));
        assert!(text.contains("  local_development"));
    }

    #[test]
    fn test_command_prints_invocation() {
        let mut out = Vec::new();
        handle_command(&shipped(), "medium_stress", None, None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let line = text.lines().last().unwrap();
        assert!(line.starts_with("surge run medium_stress -u 25 -r 5 -t 5m --host https://www.mvhs.de"));
        assert!(text.contains("export WEBSITE_PROFILE=mvhs_production"));

        assert!(handle_command(&shipped(), "no_such_test", None, None, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_validate_shipped_and_broken() {
        let dir = shipped_config_dir();
        let mut out = Vec::new();
        with_vars(CLEAN, || {
            handle_validate(&ConfigLoader::with_dir(&dir).with_fallback(&dir), &mut out)
        })
        .unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("✅"));

        let broken = TempDir::new().unwrap();
        fs::write(
            broken.path().join("website_profiles.json"),
            r#"{"default_profile": "gone", "profiles": {"bad": {"name": "Bad", "base_url": "ftp://x", "endpoints": {"search": "suche"}}}}"#,
        )
        .unwrap();
        let mut out = Vec::new();
        let loader = ConfigLoader::with_dir(broken.path()).with_fallback(broken.path());
        let result = with_vars(CLEAN, || handle_validate(&loader, &mut out));
        assert!(result.is_err());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("❌"));
        assert!(text.lines().count() >= 4, "{}", text);
    }

    #[test]
    fn test_profile_use_rewrites_default() {
        let dir = TempDir::new().unwrap();
        fs::copy(
            shipped_config_dir().join("website_profiles.json"),
            dir.path().join("website_profiles.json"),
        )
        .unwrap();
        let loader = ConfigLoader::with_dir(dir.path());

        let mut out = Vec::new();
        handle_profile_use(&loader, "local_development", &mut out).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .contains("http://localhost:8080"));

        let (profiles, _) = loader.load_profiles().unwrap();
        assert_eq!(profiles.default_profile, "local_development");
        assert!(handle_profile_use(&loader, "nowhere", &mut Vec::new()).is_err());
    }

    #[test]
    fn test_resolve_run_applies_overrides() {
        let config = shipped();
        let args = run_args(&[
            "surge",
            "run",
            "--mode",
            "full",
            "-u",
            "3",
            "-t",
            "30s",
            "--profile",
            "local_development",
            "--test-mode",
            "stress",
        ]);
        let profile = with_vars(CLEAN, || resolve_run(&config, &args)).unwrap();
        assert_eq!(profile.test_name, "medium_stress");
        assert_eq!(profile.users, 3);
        assert_eq!(profile.spawn_rate.per_second(), 5.0);
        assert_eq!(profile.run_time.as_duration(), Duration::from_secs(30));
        assert_eq!(profile.host, "http://localhost:8080");
        assert_eq!(profile.mode, surge_config::TestMode::Stress);

        let bad = run_args(&["surge", "run", "light_stress", "--behavior", "ghost_user"]);
        assert!(with_vars(CLEAN, || resolve_run(&config, &bad)).is_err());
    }

    #[test]
    fn test_seconds_rejects_non_positive() {
        assert!(seconds(0.0, "stop-timeout").is_err());
        assert!(seconds(f64::NAN, "stop-timeout").is_err());
        assert_eq!(seconds(2.5, "report-interval").unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_seconds_rejects_values_rounding_to_zero() {
        let err = seconds(1e-12, "report-interval").unwrap_err();
        assert!(err.to_string().contains("rounds to zero"), "{}", err);
        assert_eq!(seconds(0.5, "report-interval").unwrap(), Duration::from_millis(500));
    }
}
