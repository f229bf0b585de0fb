//! Request and response types

use std::time::Duration;

/// A GET request relative to the session's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Path plus query string, e.g. `/suche?q=yoga`
    pub path: String,
    /// Per-request User-Agent, replacing the session default
    pub user_agent: Option<String>,
    /// Keep the decoded body on the response instead of only its length
    pub capture_body: bool,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            user_agent: None,
            capture_body: false,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_body(mut self) -> Self {
        self.capture_body = true;
        self
    }
}

/// What came back from the last attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body_len: usize,
    /// Duration of the final attempt only, backoff sleeps excluded
    pub elapsed: Duration,
    /// Total attempts made, 1 when no retry happened
    pub attempts: u32,
    /// Response text, present when the request asked for it
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
