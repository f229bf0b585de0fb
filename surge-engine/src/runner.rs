//! Wires scheduler, users, aggregator and sinks into one load test run

use crate::error::{EngineError, EngineResult};
use crate::metrics::{aggregate, AGGREGATED};
use crate::report::{ReportSink, RunReport};
use crate::scenario::RequestPlanner;
use crate::scheduler::{Scheduler, SchedulerSettings, SchedulerStatus};
use crate::user::UserContext;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use surge_config::{HttpConfig, TestProfile};
use surge_http::{HttpClient, HttpSession};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tuning knobs that are not part of a test profile
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub report_interval: Duration,
    pub stop_timeout: Duration,
    /// Capacity of the sample channel between users and the aggregator
    pub sample_buffer: usize,
    pub seed: Option<u64>,
}

impl RunOptions {
    pub fn validate(&self) -> EngineResult<()> {
        if self.report_interval.is_zero() {
            return Err(EngineError::Options(
                "report interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(30),
            sample_buffer: 10_000,
            seed: None,
        }
    }
}

/// A configured load test, ready to run once
pub struct LoadTest {
    profile: TestProfile,
    client: Arc<dyn HttpClient>,
    options: RunOptions,
    sinks: Vec<Box<dyn ReportSink>>,
    cancel: CancellationToken,
    /// Cancelled when users are told to stop
    wind_down: CancellationToken,
}

impl LoadTest {
    pub fn new(profile: TestProfile, client: Arc<dyn HttpClient>) -> Self {
        Self {
            profile,
            client,
            options: RunOptions::default(),
            sinks: Vec::new(),
            cancel: CancellationToken::new(),
            wind_down: CancellationToken::new(),
        }
    }

    /// Load test against the profile's host through a pooled HTTP session.
    /// The session stops retrying once users are told to stop.
    pub fn with_session(profile: TestProfile, http: &HttpConfig) -> EngineResult<Self> {
        let wind_down = CancellationToken::new();
        let session = HttpSession::new(http, &profile.host)?.with_shutdown(wind_down.clone());
        let mut test = Self::new(profile, Arc::new(session));
        test.wind_down = wind_down;
        Ok(test)
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn profile(&self) -> &TestProfile {
        &self.profile
    }

    /// Cancelling this token ends the run early; reports are still written
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> EngineResult<RunReport> {
        self.options.validate()?;
        let profile = self.profile;
        info!(
            "Starting '{}' against {} ({} users, {}/s, {}, {}, {} mode)",
            profile.test_name,
            profile.host,
            profile.users,
            profile.spawn_rate,
            profile.run_time,
            profile.behavior.name,
            profile.mode
        );

        let mut report = RunReport::for_profile(&profile, Utc::now());
        let (samples, receiver) = mpsc::channel(self.options.sample_buffer.max(1));
        let context = Arc::new(UserContext {
            client: self.client,
            planner: RequestPlanner::new(profile.site.clone()),
            behavior: profile.behavior.clone(),
            mode: profile.mode,
            samples,
            seed: self.options.seed,
        });

        let mut settings = SchedulerSettings::from_profile(&profile, self.options.stop_timeout);
        settings.seed = self.options.seed;
        let scheduler =
            Scheduler::new(settings, context, self.cancel).with_wind_down(self.wind_down);
        let status: watch::Receiver<SchedulerStatus> = scheduler.subscribe();

        let mut sinks = self.sinks;
        let report_interval = self.options.report_interval;
        let aggregator = tokio::spawn(async move {
            let result = aggregate(receiver, status, &mut sinks, report_interval).await;
            (result, sinks)
        });

        // The scheduler owns the last sample sender, so the aggregator
        // finishes once it returns.
        let scheduled = scheduler.run().await;
        let (aggregated, mut sinks) = aggregator.await?;
        let metrics = aggregated?;
        let summary = scheduled?;

        let totals = metrics.totals();
        let elapsed = metrics.elapsed();
        report.finished_at = Utc::now();
        report.duration_secs = elapsed.as_secs_f64();
        report.peak_users = summary.peak_users;
        report.spawned_users = summary.spawned;
        report.aborted_users = summary.aborted;
        report.ramp_incomplete = summary.ramp_incomplete;
        report.aggregated = totals.combined()?.snapshot(AGGREGATED, elapsed);
        report.endpoints = totals.endpoint_snapshots(elapsed);
        report.failures = totals.failures();
        let report = report.with_records(metrics.into_records());

        for sink in sinks.iter_mut() {
            sink.finish(&report).await?;
        }
        info!(
            "Finished '{}': {} requests, {} failures, {} users aborted",
            report.test_name,
            report.aggregated.requests,
            report.aggregated.failures,
            report.aborted_users
        );
        Ok(report)
    }
}
