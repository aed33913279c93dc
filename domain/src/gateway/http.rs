//! HTTP clients for the backend REST API.
//!
//! Reads go through a middleware client that retries transient failures
//! (connection errors, 5xx, 408, 429) with exponential backoff. Writes use a
//! plain client and are never retried, since replaying them is not known to
//! be safe.

use crate::error::{Error, InternalErrorKind};
use log::*;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryDecision, RetryPolicy, RetryTransientMiddleware};
use std::time::{Duration, SystemTime};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum number of retries for reads.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub retry_base_delay: Duration,
    pub user_agent: String,
    /// Bearer token attached to every request.
    pub token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            user_agent: format!("gestion-ventes-sync/{}", env!("CARGO_PKG_VERSION")),
            token: None,
        }
    }
}

/// The pair of clients the REST gateway uses.
#[derive(Clone)]
pub struct ApiClients {
    /// Idempotent requests, with retries.
    pub reads: ClientWithMiddleware,
    /// Everything else, without retries.
    pub writes: reqwest::Client,
}

/// Builder for the REST API clients.
pub struct ApiClientBuilder {
    config: HttpClientConfig,
}

impl ApiClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn with_token(mut self, token: Option<&str>) -> Self {
        self.config.token = token.map(str::to_string);
        self
    }

    pub fn build(self) -> Result<ApiClients, Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone())
            .default_headers(self.default_headers()?)
            .build()?;

        let retry_policy =
            BackoffRetryPolicy::new(self.config.max_retries, self.config.retry_base_delay);
        let reads = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(ApiClients {
            reads,
            writes: client,
        })
    }

    fn default_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.config.token {
            let mut auth_header =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| {
                    warn!("Failed to create authorization header value: {err:?}");
                    Error {
                        source: Some(Box::new(err)),
                        error_kind: crate::error::DomainErrorKind::Internal(
                            InternalErrorKind::Config,
                        ),
                    }
                })?;
            auth_header.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_header);
        }

        Ok(headers)
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff retry policy for reads.
pub struct BackoffRetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffRetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn exponential_delay(&self, n_past_retries: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(n_past_retries.min(31) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl RetryPolicy for BackoffRetryPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            RetryDecision::DoNotRetry
        } else {
            let delay = self.exponential_delay(n_past_retries);
            debug!("Retrying request in {delay:?} (retry {})", n_past_retries + 1);
            RetryDecision::Retry {
                execute_after: SystemTime::now() + delay,
            }
        }
    }
}
