use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::{check_playlist_text, LoadError, PlaylistLoader};
use crate::config::ProbeConfig;

/// How often and how patiently a donor playlist download is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Upper bound for any single wait, `Retry-After` included.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt` (1-based): doubling backoff with up
    /// to 25% jitter, or the server's hint when that is longer.
    fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base = self
            .base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let jitter_range = base.as_millis() as u64 / 4;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        let wait = base + Duration::from_millis(jitter);
        hint.map_or(wait, |h| h.max(wait)).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Result of one download attempt.
enum Step {
    Done(String),
    Retry {
        error: LoadError,
        hint: Option<Duration>,
    },
    Fail(LoadError),
}

/// Downloads donor playlists over HTTP.
///
/// Network errors, timeouts, 5xx, 429 and empty bodies are retried. A body
/// that is clearly not a playlist (an HTML portal page, a JSON auth error)
/// fails at once, as does any other 4xx.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    retry: RetryPolicy,
}

impl HttpLoader {
    /// Donor lists can be several megabytes, so the download gets its own
    /// `fetch_timeout` rather than the probe's request timeout.
    pub fn new(config: &ProbeConfig, fetch_timeout: Duration, retry: RetryPolicy) -> Self {
        Self::with_client(Self::build_client(config, fetch_timeout), retry)
    }

    /// Same identity and connect timeout as the prober built from `config`.
    pub fn for_probe(config: &ProbeConfig) -> Self {
        Self::new(config, DEFAULT_FETCH_TIMEOUT, RetryPolicy::default())
    }

    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn build_client(config: &ProbeConfig, fetch_timeout: Duration) -> Client {
        Client::builder()
            .timeout(fetch_timeout)
            .connect_timeout(config.connect_timeout.min(fetch_timeout))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn attempt(&self, uri: &str, is_last: bool) -> Step {
        let response = match self.client.get(uri).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(uri, "Donor playlist download timed out");
                return Step::Retry {
                    error: LoadError::Timeout {
                        url: uri.to_string(),
                        is_last_retry: is_last,
                    },
                    hint: None,
                };
            }
            Err(e) => {
                warn!(uri, error = %e, "Donor playlist download failed");
                return Step::Retry {
                    error: network_error(uri, e, is_last),
                    hint: None,
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            return status_step(uri, status, retry_after(&response), is_last);
        }
        if is_html(&response) {
            return Step::Fail(LoadError::Parse {
                location: uri.to_string(),
                message: "server answered with an HTML page".into(),
            });
        }

        match response.text().await {
            Ok(body) if body.trim().is_empty() => {
                debug!(uri, "Donor playlist body is empty");
                Step::Retry {
                    error: LoadError::Parse {
                        location: uri.to_string(),
                        message: "empty response body".into(),
                    },
                    hint: None,
                }
            }
            Ok(body) => match check_playlist_text(uri, body) {
                Ok(text) => Step::Done(text),
                Err(e) => Step::Fail(e),
            },
            Err(e) => Step::Retry {
                error: network_error(uri, e, is_last),
                hint: None,
            },
        }
    }
}

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

impl Default for HttpLoader {
    fn default() -> Self {
        Self::for_probe(&ProbeConfig::default())
    }
}

#[async_trait]
impl PlaylistLoader for HttpLoader {
    async fn load(&self, uri: &str) -> Result<String, LoadError> {
        let mut attempt = 0;
        loop {
            let is_last = attempt == self.retry.max_retries;
            match self.attempt(uri, is_last).await {
                Step::Done(text) => {
                    debug!(uri, attempt, bytes = text.len(), "Downloaded donor playlist");
                    return Ok(text);
                }
                Step::Fail(error) => return Err(error),
                Step::Retry { error, .. } if is_last => return Err(error),
                Step::Retry { error, hint } => {
                    attempt += 1;
                    let wait = self.retry.delay(attempt, hint);
                    debug!(uri, attempt, wait_ms = wait.as_millis(), error = %error, "Retrying donor playlist");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

fn status_step(uri: &str, status: StatusCode, hint: Option<Duration>, is_last: bool) -> Step {
    let code = status.as_u16();
    warn!(uri, status = code, "Donor playlist request rejected");
    let error = LoadError::Http {
        url: uri.to_string(),
        status: code,
        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
        is_last_retry: is_last,
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Step::Retry { error, hint }
    } else {
        Step::Fail(error)
    }
}

fn network_error(uri: &str, e: reqwest::Error, is_last: bool) -> LoadError {
    LoadError::Network {
        url: uri.to_string(),
        reason: e.to_string(),
        is_last_retry: is_last,
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/html"))
}
