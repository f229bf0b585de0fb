//! Metrics aggregation
//!
//! Samples arrive on a bounded channel and are folded by a single consumer,
//! so users never contend on a lock. The consumer keeps an interval window
//! that is merged into the cumulative totals at every report tick.

use crate::error::{EngineError, EngineResult};
use crate::report::ReportSink;
use crate::sample::{RequestSample, Sample, UserAction, UserEvent};
use crate::scenario::UserClass;
use crate::scheduler::SchedulerStatus;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Highest latency the histograms track: one minute, in microseconds
const MAX_TRACKED_MICROS: u64 = 60_000_000;
const SIGNIFICANT_DIGITS: u8 = 3;

/// Name of the row summing every endpoint
pub const AGGREGATED: &str = "Aggregated";

fn latency_histogram() -> EngineResult<Histogram<u64>> {
    Ok(Histogram::new_with_bounds(1, MAX_TRACKED_MICROS, SIGNIFICANT_DIGITS)?)
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX).max(1)
}

/// Statistics for one endpoint over one window
#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub requests: u64,
    pub failures: u64,
    pub statuses: BTreeMap<u16, u64>,
    pub bytes: u64,
    min_micros: u64,
    max_micros: u64,
    sum_micros: u128,
    histogram: Histogram<u64>,
}

impl EndpointStats {
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            requests: 0,
            failures: 0,
            statuses: BTreeMap::new(),
            bytes: 0,
            min_micros: u64::MAX,
            max_micros: 0,
            sum_micros: 0,
            histogram: latency_histogram()?,
        })
    }

    pub fn record(&mut self, sample: &RequestSample) {
        let value = micros(sample.duration);
        self.requests += 1;
        if sample.failed {
            self.failures += 1;
        }
        if let Some(status) = sample.status {
            *self.statuses.entry(status).or_default() += 1;
        }
        self.bytes += sample.bytes as u64;
        self.min_micros = self.min_micros.min(value);
        self.max_micros = self.max_micros.max(value);
        self.sum_micros += u128::from(value);
        self.histogram.saturating_record(value);
    }

    pub fn merge(&mut self, other: &EndpointStats) -> EngineResult<()> {
        self.histogram
            .add(&other.histogram)
            .map_err(|e| EngineError::Histogram(format!("{:?}", e)))?;
        self.requests += other.requests;
        self.failures += other.failures;
        for (status, count) in &other.statuses {
            *self.statuses.entry(*status).or_default() += count;
        }
        self.bytes += other.bytes;
        self.min_micros = self.min_micros.min(other.min_micros);
        self.max_micros = self.max_micros.max(other.max_micros);
        self.sum_micros += other.sum_micros;
        Ok(())
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }

    /// Latency at `quantile`, never above the recorded maximum
    pub fn percentile_micros(&self, quantile: f64) -> u64 {
        if self.requests == 0 {
            return 0;
        }
        self.histogram.value_at_quantile(quantile).min(self.max_micros)
    }

    /// Summary of this window; `window` is used for requests per second
    pub fn snapshot(&self, name: &str, window: Duration) -> EndpointSnapshot {
        let secs = window.as_secs_f64();
        let per_second = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };
        let ms = |us: u64| us as f64 / 1000.0;
        let empty = self.requests == 0;

        EndpointSnapshot {
            name: name.to_string(),
            requests: self.requests,
            failures: self.failures,
            error_rate: self.error_rate(),
            rps: per_second(self.requests),
            failures_per_second: per_second(self.failures),
            min_ms: if empty { 0.0 } else { ms(self.min_micros) },
            max_ms: ms(self.max_micros),
            mean_ms: if empty {
                0.0
            } else {
                self.sum_micros as f64 / self.requests as f64 / 1000.0
            },
            p50_ms: ms(self.percentile_micros(0.50)),
            p90_ms: ms(self.percentile_micros(0.90)),
            p95_ms: ms(self.percentile_micros(0.95)),
            p99_ms: ms(self.percentile_micros(0.99)),
            avg_bytes: if empty { 0 } else { self.bytes / self.requests },
            statuses: self.statuses.clone(),
        }
    }
}

/// Point-in-time view of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub rps: f64,
    pub failures_per_second: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_bytes: u64,
    pub statuses: BTreeMap<u16, u64>,
}

/// Per-endpoint statistics plus failure reasons for one window
#[derive(Debug, Clone, Default)]
pub struct AggregatedMetrics {
    endpoints: BTreeMap<String, EndpointStats>,
    failures: BTreeMap<(String, String), u64>,
}

impl AggregatedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: &RequestSample) -> EngineResult<()> {
        let stats = match self.endpoints.entry(sample.endpoint.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(EndpointStats::new()?),
        };
        stats.record(sample);

        if let Some(reason) = &sample.failure {
            *self
                .failures
                .entry((sample.endpoint.clone(), reason.clone()))
                .or_default() += 1;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &AggregatedMetrics) -> EngineResult<()> {
        for (name, stats) in &other.endpoints {
            match self.endpoints.get_mut(name) {
                Some(existing) => existing.merge(stats)?,
                None => {
                    self.endpoints.insert(name.clone(), stats.clone());
                }
            }
        }
        for (key, count) in &other.failures {
            *self.failures.entry(key.clone()).or_default() += count;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointStats> {
        self.endpoints.get(name)
    }

    /// All endpoints folded into one
    pub fn combined(&self) -> EngineResult<EndpointStats> {
        let mut combined = EndpointStats::new()?;
        for stats in self.endpoints.values() {
            combined.merge(stats)?;
        }
        Ok(combined)
    }

    pub fn endpoint_snapshots(&self, window: Duration) -> Vec<EndpointSnapshot> {
        self.endpoints
            .iter()
            .map(|(name, stats)| stats.snapshot(name, window))
            .collect()
    }

    /// Failure occurrences grouped by endpoint and reason
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures
            .iter()
            .map(|((endpoint, reason), occurrences)| FailureRecord {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
                occurrences: *occurrences,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub endpoint: String,
    pub reason: String,
    pub occurrences: u64,
}

/// What sinks receive at every report tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub user_count: usize,
    /// Everything since the previous tick
    pub interval: EndpointSnapshot,
    /// Everything since the run started
    pub total: EndpointSnapshot,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// One search request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub search_term: String,
    pub response_time_ms: f64,
    pub results_found: u64,
    pub success: bool,
}

/// A request that ended without any response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: usize,
    /// `None` when the user's start was never seen
    pub user_class: Option<UserClass>,
    pub endpoint: String,
    pub error: String,
}

/// Per-event detail kept for the whole run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecords {
    pub searches: Vec<SearchRecord>,
    pub users: Vec<UserEvent>,
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchSummary {
    pub searches: u64,
    pub successful: u64,
    pub success_rate: f64,
    pub with_results: u64,
    pub avg_results: f64,
    pub avg_response_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserSummary {
    pub started: u64,
    pub stopped: u64,
    /// Mean session length of users that stopped normally
    pub avg_session_secs: f64,
}

fn mean(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

impl RunRecords {
    pub fn search_summary(&self) -> SearchSummary {
        let searches = self.searches.len() as u64;
        let successful = self.searches.iter().filter(|s| s.success).count() as u64;
        let results: u64 = self.searches.iter().map(|s| s.results_found).sum();
        let response: f64 = self.searches.iter().map(|s| s.response_time_ms).sum();
        SearchSummary {
            searches,
            successful,
            success_rate: mean(successful as f64, searches),
            with_results: self.searches.iter().filter(|s| s.results_found > 0).count() as u64,
            avg_results: mean(results as f64, searches),
            avg_response_ms: mean(response, searches),
        }
    }

    pub fn user_summary(&self) -> UserSummary {
        let count = |action| self.users.iter().filter(|e| e.action == action).count() as u64;
        let stopped = count(UserAction::UserStop);
        let session: f64 = self
            .users
            .iter()
            .filter(|e| e.action == UserAction::UserStop)
            .map(|e| e.duration.as_secs_f64())
            .sum();
        UserSummary {
            started: count(UserAction::UserStart),
            stopped,
            avg_session_secs: mean(session, stopped),
        }
    }
}

/// Interval and cumulative windows, owned by the aggregator task
#[derive(Debug)]
pub struct MetricsAggregator {
    interval: AggregatedMetrics,
    total: AggregatedMetrics,
    records: RunRecords,
    classes: HashMap<usize, UserClass>,
    started: Instant,
    last_tick: Instant,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            interval: AggregatedMetrics::new(),
            total: AggregatedMetrics::new(),
            records: RunRecords::default(),
            classes: HashMap::new(),
            started: now,
            last_tick: now,
        }
    }

    pub fn observe(&mut self, sample: Sample) -> EngineResult<()> {
        match sample {
            Sample::Request(request) => self.record(&request),
            Sample::User(event) => {
                self.record_user(event);
                Ok(())
            }
        }
    }

    pub fn record(&mut self, sample: &RequestSample) -> EngineResult<()> {
        if let Some(search) = &sample.search {
            self.records.searches.push(SearchRecord {
                timestamp: sample.started_at,
                endpoint: sample.endpoint.clone(),
                search_term: search.term.clone(),
                response_time_ms: sample.duration.as_micros() as f64 / 1000.0,
                results_found: search.results,
                success: !sample.failed,
            });
        }
        if sample.status.is_none() {
            self.records.errors.push(ErrorRecord {
                timestamp: sample.started_at,
                user_id: sample.user_id,
                user_class: self.classes.get(&sample.user_id).copied(),
                endpoint: sample.endpoint.clone(),
                error: sample.failure.clone().unwrap_or_default(),
            });
        }
        self.interval.record(sample)
    }

    pub fn record_user(&mut self, event: UserEvent) {
        if event.action == UserAction::UserStart {
            self.classes.insert(event.user_id, event.user_class);
        }
        self.records.users.push(event);
    }

    /// Merge the interval window into the totals and describe both
    pub fn tick(&mut self, user_count: usize) -> EngineResult<MetricsSnapshot> {
        let now = Instant::now();
        let interval_window = now.duration_since(self.last_tick);
        let elapsed = now.duration_since(self.started);
        self.last_tick = now;

        let interval = std::mem::take(&mut self.interval);
        self.total.merge(&interval)?;

        Ok(MetricsSnapshot {
            timestamp: Utc::now(),
            elapsed_secs: elapsed.as_secs_f64(),
            user_count,
            interval: interval.combined()?.snapshot(AGGREGATED, interval_window),
            total: self.total.combined()?.snapshot(AGGREGATED, elapsed),
            endpoints: self.total.endpoint_snapshots(elapsed),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cumulative totals; call after the final tick
    pub fn totals(&self) -> &AggregatedMetrics {
        &self.total
    }

    pub fn records(&self) -> &RunRecords {
        &self.records
    }

    pub fn into_records(self) -> RunRecords {
        self.records
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Single consumer of samples.
///
/// Runs until every sender is dropped, emitting a snapshot to each sink every
/// `report_interval` and once more at the end.
pub async fn aggregate(
    mut samples: mpsc::Receiver<Sample>,
    status: watch::Receiver<SchedulerStatus>,
    sinks: &mut [Box<dyn ReportSink>],
    report_interval: Duration,
) -> EngineResult<MetricsAggregator> {
    if report_interval.is_zero() {
        return Err(EngineError::Options(
            "report interval must be positive".to_string(),
        ));
    }
    let mut aggregator = MetricsAggregator::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + report_interval, report_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_sample = samples.recv() => {
                match maybe_sample {
                    Some(sample) => aggregator.observe(sample)?,
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let active = status.borrow().active;
                let snapshot = aggregator.tick(active)?;
                debug!("Report tick at {:.1}s", snapshot.elapsed_secs);
                emit(sinks, &snapshot).await;
            }
        }
    }

    let active = status.borrow().active;
    let snapshot = aggregator.tick(active)?;
    emit(sinks, &snapshot).await;
    Ok(aggregator)
}

async fn emit(sinks: &mut [Box<dyn ReportSink>], snapshot: &MetricsSnapshot) {
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.on_snapshot(snapshot).await {
            warn!("Report sink {} failed: {}", sink.name(), e);
        }
    }
}
