//! Report sinks: periodic snapshots and the final run report

use crate::error::{EngineError, EngineResult};
use crate::metrics::{
    EndpointSnapshot, FailureRecord, MetricsSnapshot, RunRecords, SearchSummary, UserSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use surge_config::{TestMode, TestProfile};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives metrics snapshots while a run is going and the report at its end
#[async_trait]
pub trait ReportSink: Send {
    fn name(&self) -> &'static str;
    async fn on_snapshot(&mut self, snapshot: &MetricsSnapshot) -> EngineResult<()>;
    async fn finish(&mut self, report: &RunReport) -> EngineResult<()>;
}

/// Final outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub test_name: String,
    pub profile_name: String,
    pub host: String,
    pub target_users: u32,
    pub spawn_rate: f64,
    pub run_time: String,
    pub behavior: String,
    pub mode: TestMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub peak_users: usize,
    pub spawned_users: usize,
    /// Users still busy at the stop timeout and force-stopped
    pub aborted_users: usize,
    /// The run ended before every user was started
    pub ramp_incomplete: bool,
    pub aggregated: EndpointSnapshot,
    pub endpoints: Vec<EndpointSnapshot>,
    pub failures: Vec<FailureRecord>,
    pub searches: SearchSummary,
    pub users: UserSummary,
    /// Requests that got no response at all
    pub transport_errors: u64,
    /// Per-event detail, written to their own files
    #[serde(skip)]
    pub records: RunRecords,
}

impl RunReport {
    /// Report skeleton for `profile`; statistics are filled in by the runner
    pub fn for_profile(profile: &TestProfile, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            test_name: profile.test_name.clone(),
            profile_name: profile.profile_name.clone(),
            host: profile.host.clone(),
            target_users: profile.users,
            spawn_rate: profile.spawn_rate.per_second(),
            run_time: profile.run_time.to_string(),
            behavior: profile.behavior.name.clone(),
            mode: profile.mode,
            started_at,
            finished_at: started_at,
            duration_secs: 0.0,
            peak_users: 0,
            spawned_users: 0,
            aborted_users: 0,
            ramp_incomplete: false,
            aggregated: empty_snapshot(),
            endpoints: Vec::new(),
            failures: Vec::new(),
            searches: SearchSummary::default(),
            users: UserSummary::default(),
            transport_errors: 0,
            records: RunRecords::default(),
        }
    }

    /// Fill the per-event records and the summaries derived from them
    pub fn with_records(mut self, records: RunRecords) -> Self {
        self.searches = records.search_summary();
        self.users = records.user_summary();
        self.transport_errors = records.errors.len() as u64;
        self.records = records;
        self
    }

    pub fn total_requests(&self) -> u64 {
        self.aggregated.requests
    }
}

fn empty_snapshot() -> EndpointSnapshot {
    EndpointSnapshot {
        name: crate::metrics::AGGREGATED.to_string(),
        requests: 0,
        failures: 0,
        error_rate: 0.0,
        rps: 0.0,
        failures_per_second: 0.0,
        min_ms: 0.0,
        max_ms: 0.0,
        mean_ms: 0.0,
        p50_ms: 0.0,
        p90_ms: 0.0,
        p95_ms: 0.0,
        p99_ms: 0.0,
        avg_bytes: 0,
        statuses: Default::default(),
    }
}

/// Logs each tick and the final summary through `tracing`
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl ReportSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn on_snapshot(&mut self, snapshot: &MetricsSnapshot) -> EngineResult<()> {
        info!(
            users = snapshot.user_count,
            rps = snapshot.interval.rps,
            fails_per_sec = snapshot.interval.failures_per_second,
            p50_ms = snapshot.interval.p50_ms,
            p95_ms = snapshot.interval.p95_ms,
            total_requests = snapshot.total.requests,
            total_failures = snapshot.total.failures,
            "[{:>6.1}s] progress",
            snapshot.elapsed_secs
        );
        Ok(())
    }

    async fn finish(&mut self, report: &RunReport) -> EngineResult<()> {
        info!(
            "Run {} of '{}' against {} finished after {:.1}s",
            report.run_id, report.test_name, report.host, report.duration_secs
        );
        info!(
            "Users: {} of {} started, peak {}, avg session {:.1}s",
            report.spawned_users,
            report.target_users,
            report.peak_users,
            report.users.avg_session_secs
        );
        if report.ramp_incomplete {
            warn!("Run ended before all users were started");
        }
        if report.aborted_users > 0 {
            warn!(
                "{} users were aborted at the stop timeout",
                report.aborted_users
            );
        }
        for endpoint in report.endpoints.iter().chain(Some(&report.aggregated)) {
            info!(
                "{:<40} {:>8} reqs {:>6} fails  avg {:>8.1}ms  p50 {:>8.1}ms  p95 {:>8.1}ms  p99 {:>8.1}ms  {:>7.2} req/s",
                endpoint.name,
                endpoint.requests,
                endpoint.failures,
                endpoint.mean_ms,
                endpoint.p50_ms,
                endpoint.p95_ms,
                endpoint.p99_ms,
                endpoint.rps
            );
        }
        if report.searches.searches > 0 {
            info!(
                "Searches: {} ({:.1}% ok, {} with results, avg {:.1} results, avg {:.1}ms)",
                report.searches.searches,
                report.searches.success_rate * 100.0,
                report.searches.with_results,
                report.searches.avg_results,
                report.searches.avg_response_ms
            );
        }
        for failure in &report.failures {
            warn!(
                "{} x {}: {}",
                failure.occurrences, failure.endpoint, failure.reason
            );
        }
        Ok(())
    }
}

const HISTORY_HEADER: [&str; 12] = [
    "Timestamp",
    "User Count",
    "Requests/s",
    "Failures/s",
    "50%",
    "95%",
    "99%",
    "Total Request Count",
    "Total Failure Count",
    "Total Median Response Time",
    "Total Average Response Time",
    "Total Max Response Time",
];

const STATS_HEADER: [&str; 13] = [
    "Name",
    "Request Count",
    "Failure Count",
    "Error Rate",
    "Average Response Time",
    "Min Response Time",
    "Max Response Time",
    "Average Content Size",
    "Requests/s",
    "50%",
    "90%",
    "95%",
    "99%",
];

/// Finish a CSV buffer
fn csv_bytes(writer: csv::Writer<Vec<u8>>) -> EngineResult<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| EngineError::Io(e.into_error()))
}

fn json_bytes(value: &impl Serialize) -> EngineResult<Vec<u8>> {
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    Ok(content)
}

async fn append(path: &Path, bytes: &[u8]) -> EngineResult<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Writes CSV and JSON files sharing one path prefix
#[derive(Debug)]
pub struct FileSink {
    prefix: PathBuf,
    history_started: bool,
}

impl FileSink {
    /// Sink writing `<prefix>_*.csv` and `<prefix>_*.json`; creates the
    /// parent directory.
    pub async fn create(prefix: impl Into<PathBuf>) -> EngineResult<Self> {
        let prefix = prefix.into();
        if let Some(parent) = prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            prefix,
            history_started: false,
        })
    }

    pub fn path(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_os_string();
        name.push(format!("_{}", suffix));
        PathBuf::from(name)
    }

    pub fn history_path(&self) -> PathBuf {
        self.path("stats_history.csv")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path("stats.csv")
    }

    pub fn failures_path(&self) -> PathBuf {
        self.path("failures.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path("summary.json")
    }

    pub fn search_metrics_path(&self, extension: &str) -> PathBuf {
        self.path(&format!("search_metrics.{}", extension))
    }

    pub fn user_metrics_path(&self) -> PathBuf {
        self.path("user_metrics.json")
    }

    pub fn error_metrics_path(&self) -> PathBuf {
        self.path("error_metrics.json")
    }

    /// A header is needed unless an earlier run left rows behind
    async fn history_needs_header(&self, path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        }
    }

    fn render_stats(report: &RunReport) -> EngineResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(STATS_HEADER)?;
        for endpoint in report.endpoints.iter().chain(Some(&report.aggregated)) {
            writer.write_record([
                endpoint.name.clone(),
                endpoint.requests.to_string(),
                endpoint.failures.to_string(),
                format!("{:.4}", endpoint.error_rate),
                format!("{:.2}", endpoint.mean_ms),
                format!("{:.2}", endpoint.min_ms),
                format!("{:.2}", endpoint.max_ms),
                endpoint.avg_bytes.to_string(),
                format!("{:.2}", endpoint.rps),
                format!("{:.2}", endpoint.p50_ms),
                format!("{:.2}", endpoint.p90_ms),
                format!("{:.2}", endpoint.p95_ms),
                format!("{:.2}", endpoint.p99_ms),
            ])?;
        }
        csv_bytes(writer)
    }

    fn render_failures(report: &RunReport) -> EngineResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["Name", "Error", "Occurrences"])?;
        for failure in &report.failures {
            writer.write_record([
                failure.endpoint.as_str(),
                failure.reason.as_str(),
                failure.occurrences.to_string().as_str(),
            ])?;
        }
        csv_bytes(writer)
    }

    /// Search, user and error records; each file only when it has entries
    async fn write_records(&self, records: &RunRecords) -> EngineResult<()> {
        if !records.searches.is_empty() {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for search in &records.searches {
                writer.serialize(search)?;
            }
            fs::write(self.search_metrics_path("csv"), csv_bytes(writer)?).await?;
            fs::write(
                self.search_metrics_path("json"),
                json_bytes(&records.searches)?,
            )
            .await?;
        }
        if !records.users.is_empty() {
            fs::write(self.user_metrics_path(), json_bytes(&records.users)?).await?;
        }
        if !records.errors.is_empty() {
            fs::write(self.error_metrics_path(), json_bytes(&records.errors)?).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReportSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn on_snapshot(&mut self, snapshot: &MetricsSnapshot) -> EngineResult<()> {
        let path = self.history_path();
        let mut writer = csv::Writer::from_writer(Vec::new());
        if !self.history_started {
            if self.history_needs_header(&path).await {
                writer.write_record(HISTORY_HEADER)?;
            }
            debug!("Appending stats history to {}", path.display());
            self.history_started = true;
        }
        writer.write_record([
            snapshot.timestamp.timestamp().to_string(),
            snapshot.user_count.to_string(),
            format!("{:.2}", snapshot.interval.rps),
            format!("{:.2}", snapshot.interval.failures_per_second),
            format!("{:.2}", snapshot.interval.p50_ms),
            format!("{:.2}", snapshot.interval.p95_ms),
            format!("{:.2}", snapshot.interval.p99_ms),
            snapshot.total.requests.to_string(),
            snapshot.total.failures.to_string(),
            format!("{:.2}", snapshot.total.p50_ms),
            format!("{:.2}", snapshot.total.mean_ms),
            format!("{:.2}", snapshot.total.max_ms),
        ])?;
        append(&path, &csv_bytes(writer)?).await
    }

    async fn finish(&mut self, report: &RunReport) -> EngineResult<()> {
        fs::write(self.stats_path(), Self::render_stats(report)?).await?;
        fs::write(self.failures_path(), Self::render_failures(report)?).await?;
        fs::write(self.summary_path(), json_bytes(report)?).await?;
        self.write_records(&report.records).await?;
        info!("Reports written to {}_*", self.prefix.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{AggregatedMetrics, MetricsAggregator, AGGREGATED};
    use crate::sample::{RequestSample, UserEvent};
    use crate::scenario::UserClass;
    use std::time::Duration;
    use tempfile::TempDir;

    fn report(metrics: &AggregatedMetrics) -> RunReport {
        let window = Duration::from_secs(10);
        RunReport {
            run_id: Uuid::new_v4(),
            test_name: "light_stress".to_string(),
            profile_name: "local".to_string(),
            host: "http://localhost:8080".to_string(),
            target_users: 5,
            spawn_rate: 1.0,
            run_time: "1m".to_string(),
            behavior: "normal_user".to_string(),
            mode: TestMode::Realistic,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_secs: 10.0,
            peak_users: 5,
            spawned_users: 5,
            aborted_users: 1,
            ramp_incomplete: false,
            aggregated: metrics.combined().unwrap().snapshot(AGGREGATED, window),
            endpoints: metrics.endpoint_snapshots(window),
            failures: metrics.failures(),
            searches: SearchSummary::default(),
            users: UserSummary::default(),
            transport_errors: 0,
            records: RunRecords::default(),
        }
    }

    fn sample(endpoint: &str, status: u16) -> RequestSample {
        let failed = status >= 400;
        RequestSample {
            endpoint: endpoint.to_string(),
            user_id: 1,
            started_at: Utc::now(),
            duration: Duration::from_millis(25),
            status: Some(status),
            failed,
            failure: failed.then(|| format!("HTTP {}", status)),
            bytes: 512,
            search: None,
        }
    }

    fn metrics() -> AggregatedMetrics {
        let mut metrics = AggregatedMetrics::new();
        for (endpoint, status) in [("Homepage", 200), ("Search", 200), ("Search", 500)] {
            metrics.record(&sample(endpoint, status)).unwrap();
        }
        metrics
    }

    fn snapshot(report: &RunReport) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            elapsed_secs: 10.0,
            user_count: 5,
            interval: report.aggregated.clone(),
            total: report.aggregated.clone(),
            endpoints: report.endpoints.clone(),
        }
    }

    #[tokio::test]
    async fn test_file_sink_writes_all_reports() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("nested").join("light_stress_20240309_140507");
        let mut sink = FileSink::create(&prefix).await.unwrap();
        let metrics = metrics();
        let report = report(&metrics);

        sink.on_snapshot(&snapshot(&report)).await.unwrap();
        sink.on_snapshot(&snapshot(&report)).await.unwrap();
        sink.finish(&report).await.unwrap();

        let history = std::fs::read_to_string(sink.history_path()).unwrap();
        assert_eq!(history.lines().count(), 3);
        assert!(history.starts_with("Timestamp,User Count"));

        let stats = std::fs::read_to_string(sink.stats_path()).unwrap();
        let rows: Vec<_> = stats.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[1].starts_with("Homepage,1,0"));
        assert!(rows[2].starts_with("Search,2,1"));
        assert!(rows[3].starts_with("Aggregated,3,1"));

        let failures = std::fs::read_to_string(sink.failures_path()).unwrap();
        assert!(failures.contains("Search,HTTP 500,1"));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["test_name"], "light_stress");
        assert_eq!(summary["aggregated"]["requests"], 3);
        assert_eq!(summary["aborted_users"], 1);
        assert_eq!(summary["ramp_incomplete"], false);
        assert!(summary.get("records").is_none());

        // No records, no record files.
        assert!(!sink.search_metrics_path("csv").exists());
        assert!(!sink.user_metrics_path().exists());
        assert!(!sink.error_metrics_path().exists());
    }

    #[tokio::test]
    async fn test_file_sink_writes_event_records() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::create(dir.path().join("run")).await.unwrap();

        let mut aggregator = MetricsAggregator::new();
        aggregator.record_user(UserEvent::started(1, UserClass::Normal));
        aggregator
            .record(&sample("Search", 200).with_search("yoga, pilates", 7))
            .unwrap();
        let mut lost = sample("Homepage", 200);
        lost.status = None;
        lost.failed = true;
        lost.failure = Some("timeout: operation timed out".to_string());
        aggregator.record(&lost).unwrap();
        aggregator.record_user(UserEvent::stopped(1, UserClass::Normal, Duration::from_secs(42)));

        let report = report(&metrics()).with_records(aggregator.into_records());
        assert_eq!(report.searches.searches, 1);
        assert_eq!(report.users.avg_session_secs, 42.0);
        assert_eq!(report.transport_errors, 1);
        sink.finish(&report).await.unwrap();

        let csv = std::fs::read_to_string(sink.search_metrics_path("csv")).unwrap();
        let rows: Vec<_> = csv.lines().collect();
        assert_eq!(
            rows[0],
            "timestamp,endpoint,search_term,response_time_ms,results_found,success"
        );
        assert!(rows[1].contains(",Search,\"yoga, pilates\",25.0,7,true"), "{}", rows[1]);

        let searches: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(sink.search_metrics_path("json")).unwrap(),
        )
        .unwrap();
        assert_eq!(searches[0]["results_found"], 7);

        let users: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.user_metrics_path()).unwrap())
                .unwrap();
        assert_eq!(users.as_array().unwrap().len(), 2);
        assert_eq!(users[1]["action"], "user_stop");
        assert_eq!(users[1]["duration"], 42.0);

        let errors: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.error_metrics_path()).unwrap())
                .unwrap();
        assert_eq!(errors[0]["user_class"], "normal");
        assert_eq!(errors[0]["error"], "timeout: operation timed out");

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.summary_path()).unwrap())
                .unwrap();
        assert_eq!(summary["searches"]["avg_results"], 7.0);
        assert_eq!(summary["users"]["started"], 1);
        assert_eq!(summary["transport_errors"], 1);
    }

    #[tokio::test]
    async fn test_history_appends_across_sinks() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("run");
        let metrics = metrics();
        let report = report(&metrics);
        let mut snapshot = snapshot(&report);
        snapshot.endpoints.clear();

        for _ in 0..2 {
            let mut sink = FileSink::create(&prefix).await.unwrap();
            sink.on_snapshot(&snapshot).await.unwrap();
        }

        let history = std::fs::read_to_string(dir.path().join("run_stats_history.csv")).unwrap();
        assert_eq!(history.lines().filter(|l| l.starts_with("Timestamp")).count(), 1);
        assert_eq!(history.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_console_sink_accepts_report() {
        let mut sink = ConsoleSink;
        let mut report = report(&metrics());
        report.ramp_incomplete = true;
        sink.on_snapshot(&snapshot(&report)).await.unwrap();
        sink.finish(&report).await.unwrap();
    }
}
