//! HTTP session shared by all virtual users

use crate::errors::HttpError;
use crate::types::{HttpRequest, HttpResponse};
use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use surge_config::{HttpConfig, RetryConfig};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// HTTP client trait for issuing requests against the target site
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Pooled HTTP session with retries on transient failures
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    base_url: Url,
    retry: RetryConfig,
    in_flight: Option<Arc<Semaphore>>,
    shutdown: Option<CancellationToken>,
}

/// Status, body length and optional text of one attempt
type Attempt = (u16, usize, Option<String>);

impl HttpSession {
    /// Create a session for `base_url` with the given settings
    pub fn new(config: &HttpConfig, base_url: &str) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(HttpError::InvalidUrl(format!("{} cannot be a base URL", base_url)));
        }

        debug!(
            "Creating HTTP session for {} with {}s timeout",
            base_url,
            config.timeout.as_secs_f64()
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .pool_idle_timeout(config.pool.idle_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            retry: config.retry.clone(),
            in_flight: config.max_in_flight.map(|limit| Arc::new(Semaphore::new(limit))),
            shutdown: None,
        })
    }

    /// Stop retrying once `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|token| token.is_cancelled())
    }

    /// Sleep before the next retry; false when shutdown cut the wait short
    async fn backoff(&self, delay: std::time::Duration) -> bool {
        match &self.shutdown {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a request path
    pub fn url_for(&self, path: &str) -> Result<Url, HttpError> {
        self.base_url
            .join(path)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn attempt(&self, request: &HttpRequest, url: &Url) -> Result<Attempt, HttpError> {
        let mut builder = self.client.get(url.clone());
        if let Some(user_agent) = &request.user_agent {
            let value = HeaderValue::from_str(user_agent)
                .map_err(|_| HttpError::InvalidHeader(USER_AGENT.to_string()))?;
            builder = builder.header(USER_AGENT, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // Drain the body so the connection returns to the pool.
        if request.capture_body {
            let text = response.text().await?;
            Ok((status, text.len(), Some(text)))
        } else {
            let body = response.bytes().await?;
            Ok((status, body.len(), None))
        }
    }
}

#[async_trait::async_trait]
impl HttpClient for HttpSession {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = self.url_for(&request.path)?;
        let _permit = match &self.in_flight {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|e| HttpError::ConfigError(e.to_string()))?,
            ),
            None => None,
        };

        let mut retry = 0;
        loop {
            let started = Instant::now();
            let outcome = self.attempt(request, &url).await;
            let elapsed = started.elapsed();
            let retryable = match &outcome {
                Ok((status, _, _)) => self.retry.should_retry(*status),
                Err(e) => e.is_transient(),
            };

            let give_up = !retryable || retry >= self.retry.max_retries || self.shutting_down();
            if !give_up {
                let delay = self.retry.backoff(retry + 1);
                match &outcome {
                    Ok((status, _, _)) => warn!(
                        "GET {} returned {}, retry {} of {} in {:?}",
                        url,
                        status,
                        retry + 1,
                        self.retry.max_retries,
                        delay
                    ),
                    Err(e) => warn!(
                        "GET {} failed ({}), retry {} of {} in {:?}",
                        url,
                        e,
                        retry + 1,
                        self.retry.max_retries,
                        delay
                    ),
                }
                if self.backoff(delay).await {
                    retry += 1;
                    continue;
                }
                debug!("Shutdown during backoff, keeping last outcome for {}", url);
            }

            let (status, body_len, body) = outcome?;
            debug!("GET {} -> {}", url, status);
            return Ok(HttpResponse {
                status,
                body_len,
                elapsed,
                attempts: retry + 1,
                body,
            });
        }
    }
}
