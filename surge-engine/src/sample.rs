//! Events emitted by virtual users

use crate::scenario::UserClass;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use surge_http::{HttpError, HttpResponse};

/// Everything a virtual user reports to the aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Request(RequestSample),
    User(UserEvent),
}

impl From<RequestSample> for Sample {
    fn from(sample: RequestSample) -> Self {
        Sample::Request(sample)
    }
}

impl From<UserEvent> for Sample {
    fn from(event: UserEvent) -> Self {
        Sample::User(event)
    }
}

/// What a search request asked for and how many results the page showed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub term: String,
    pub results: u64,
}

/// One request outcome. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSample {
    /// Aggregation name, e.g. `Search` or `Category: Sprachen`
    pub endpoint: String,
    pub user_id: usize,
    pub started_at: DateTime<Utc>,
    #[serde(with = "surge_config::duration::serde_secs_f64")]
    pub duration: Duration,
    /// `None` when no response arrived
    pub status: Option<u16>,
    pub failed: bool,
    pub failure: Option<String>,
    pub bytes: usize,
    /// Set on search requests
    pub search: Option<SearchOutcome>,
}

impl RequestSample {
    pub fn from_response(
        endpoint: impl Into<String>,
        user_id: usize,
        started_at: DateTime<Utc>,
        response: &HttpResponse,
    ) -> Self {
        let failed = !response.is_success();
        Self {
            endpoint: endpoint.into(),
            user_id,
            started_at,
            duration: response.elapsed,
            status: Some(response.status),
            failed,
            failure: failed.then(|| format!("HTTP {}", response.status)),
            bytes: response.body_len,
            search: None,
        }
    }

    pub fn from_error(
        endpoint: impl Into<String>,
        user_id: usize,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: &HttpError,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id,
            started_at,
            duration,
            status: None,
            failed: true,
            failure: Some(format!("{}: {}", error.kind(), error)),
            bytes: 0,
            search: None,
        }
    }

    pub fn with_search(mut self, term: impl Into<String>, results: u64) -> Self {
        self.search = Some(SearchOutcome {
            term: term.into(),
            results,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    UserStart,
    UserStop,
}

/// A virtual user starting or stopping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: usize,
    pub user_class: UserClass,
    pub action: UserAction,
    /// Zero on start; the whole session on stop
    #[serde(with = "surge_config::duration::serde_secs_f64")]
    pub duration: Duration,
}

impl UserEvent {
    pub fn started(user_id: usize, user_class: UserClass) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            user_class,
            action: UserAction::UserStart,
            duration: Duration::ZERO,
        }
    }

    pub fn stopped(user_id: usize, user_class: UserClass, session: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            user_class,
            action: UserAction::UserStop,
            duration: session,
        }
    }
}
