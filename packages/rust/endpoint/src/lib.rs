//! SPARQL-over-HTTP endpoint client.
//!
//! Executes a query against a remote SPARQL 1.1 endpoint and returns the
//! result rows. Transient failures (connection errors, timeouts, 429, 5xx)
//! are retried with exponential backoff; everything else fails fast with a
//! typed [`KbSyncError`].

mod bindings;
mod retry;

use std::collections::HashMap;
use std::time::Duration;

use kbsync_shared::{EndpointSettings, KbSyncError, Result};
use reqwest::Client;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

pub use bindings::{Binding, RdfTerm, TermKind, parse_results};
pub use retry::{RetryPolicy, parse_retry_after};

/// Media type of SPARQL JSON results.
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// User-Agent string sent with every query.
const USER_AGENT: &str = concat!("kbsync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Per-endpoint policy
// ---------------------------------------------------------------------------

/// Retry and pacing rules for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointPolicy {
    pub retry: RetryPolicy,
    /// Minimum gap between the starts of consecutive requests.
    pub min_interval: Duration,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            min_interval: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// SparqlClient
// ---------------------------------------------------------------------------

/// Shared SPARQL client. Cheap to share behind an `Arc`; holds no state
/// beyond connection pooling and per-endpoint pacing.
pub struct SparqlClient {
    http: Client,
    default_policy: EndpointPolicy,
    policies: HashMap<String, EndpointPolicy>,
    /// Earliest instant the next request to each endpoint may start.
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl SparqlClient {
    /// Client with default policy for every endpoint.
    pub fn new() -> Result<Self> {
        Self::with_policy(EndpointPolicy::default())
    }

    /// Client with the given policy for every endpoint.
    pub fn with_policy(policy: EndpointPolicy) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KbSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            default_policy: policy,
            policies: HashMap::new(),
            next_slot: Mutex::new(HashMap::new()),
        })
    }

    /// Client configured from per-source endpoint settings.
    pub fn from_settings(settings: &[EndpointSettings]) -> Result<Self> {
        let mut client = Self::new()?;
        for endpoint in settings {
            let policy = EndpointPolicy {
                retry: RetryPolicy {
                    max_retries: endpoint.max_retries,
                    ..RetryPolicy::default()
                },
                min_interval: endpoint.min_interval,
            };
            client = client.with_endpoint_policy(&endpoint.url, policy);
        }
        Ok(client)
    }

    /// Override the policy for one endpoint.
    pub fn with_endpoint_policy(mut self, endpoint: &Url, policy: EndpointPolicy) -> Self {
        self.policies.insert(endpoint.to_string(), policy);
        self
    }

    fn policy_for(&self, endpoint: &Url) -> EndpointPolicy {
        self.policies
            .get(endpoint.as_str())
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Execute `query` against `endpoint`, each attempt bounded by `timeout`.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn execute(
        &self,
        query: &str,
        endpoint: &Url,
        timeout: Duration,
    ) -> Result<Vec<Binding>> {
        let policy = self.policy_for(endpoint);
        let mut attempt = 0u32;

        loop {
            self.pace(endpoint, policy.min_interval).await;

            let err = match self.attempt(query, endpoint, timeout).await {
                Ok(rows) => {
                    debug!(rows = rows.len(), attempt, "query succeeded");
                    return Ok(rows);
                }
                Err(err) => err,
            };

            if !err.error.is_transient() || attempt >= policy.retry.max_retries {
                return Err(err.error);
            }

            let delay = policy.retry.delay_for(attempt, err.retry_after);
            warn!(
                error = %err.error,
                attempt = attempt + 1,
                max_retries = policy.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "transient endpoint failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Wait until this endpoint's next request slot and reserve the one after.
    async fn pace(&self, endpoint: &Url, min_interval: Duration) {
        if min_interval.is_zero() {
            return;
        }

        let start = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(endpoint.as_str())
                .copied()
                .filter(|slot| *slot > now)
                .unwrap_or(now);
            slots.insert(endpoint.to_string(), slot + min_interval);
            slot
        };

        tokio::time::sleep_until(start).await;
    }

    /// One HTTP round trip.
    async fn attempt(
        &self,
        query: &str,
        endpoint: &Url,
        timeout: Duration,
    ) -> std::result::Result<Vec<Binding>, AttemptError> {
        let response = self
            .http
            .post(endpoint.clone())
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .form(&[("query", query)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AttemptError::from(classify(e, endpoint, timeout)))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                error: KbSyncError::Endpoint {
                    endpoint: endpoint.to_string(),
                    status: Some(status.as_u16()),
                    message: format!("HTTP {status}: {}", snippet(&body)),
                },
                retry_after,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::from(classify(e, endpoint, timeout)))?;

        parse_results(&body).map_err(|message| {
            AttemptError::from(KbSyncError::Endpoint {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message,
            })
        })
    }
}

/// A failed attempt plus any server-requested delay.
struct AttemptError {
    error: KbSyncError,
    retry_after: Option<u64>,
}

impl From<KbSyncError> for AttemptError {
    fn from(error: KbSyncError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Map a transport error onto the error model.
fn classify(err: reqwest::Error, endpoint: &Url, timeout: Duration) -> KbSyncError {
    if err.is_timeout() {
        KbSyncError::Timeout {
            endpoint: endpoint.to_string(),
            after_ms: timeout.as_millis() as u64,
        }
    } else {
        KbSyncError::Network(format!("{endpoint}: {err}"))
    }
}

/// First line of an error body, truncated for logs.
fn snippet(body: &str) -> String {
    let line = body.lines().next().unwrap_or("").trim();
    line.chars().take(200).collect()
}
