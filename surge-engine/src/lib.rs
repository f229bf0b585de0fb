//! Load generation engine for surge
//!
//! A [`LoadTest`] takes a resolved [`surge_config::TestProfile`], starts
//! virtual users at the configured spawn rate, feeds every request sample and
//! user start or stop to a single aggregator task and hands snapshots to the
//! configured report sinks.

pub mod error;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod sample;
pub mod scenario;
pub mod scheduler;
pub mod search;
pub mod user;

pub use error::{EngineError, EngineResult};
pub use metrics::{
    AggregatedMetrics, EndpointSnapshot, ErrorRecord, FailureRecord, MetricsSnapshot, RunRecords,
    SearchRecord, SearchSummary, UserSummary,
};
pub use report::{ConsoleSink, FileSink, ReportSink, RunReport};
pub use runner::{LoadTest, RunOptions};
pub use sample::{RequestSample, Sample, SearchOutcome, UserAction, UserEvent};
pub use scenario::{Action, RequestPlanner, UserClass};
pub use scheduler::{Scheduler, SchedulerSettings, SchedulerState, SchedulerStatus};
pub use user::{UserContext, VirtualUser};
