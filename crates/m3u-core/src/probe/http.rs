use std::error::Error as _;
use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::{ProbeOutcome, Prober};
use crate::config::ProbeConfig;

const STREAM_SCHEMES: &[&str] = &["rtmp", "rtmps", "rtsp", "udp", "tcp", "rtp"];
const PASSIVE_SCHEMES: &[&str] = &["file", "ftp"];

/// How a URL will be checked, decided without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlClass {
    Http,
    /// Streaming protocol with no generic client; assumed reachable.
    Stream(String),
    /// Scheme that is not actively checked.
    Passive(String),
    Invalid(&'static str),
}

pub fn classify(url: &str, max_len: usize) -> UrlClass {
    let url = url.trim();
    if url.is_empty() {
        return UrlClass::Invalid("empty URL");
    }
    if url.len() > max_len {
        return UrlClass::Invalid("URL too long");
    }
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return UrlClass::Invalid("malformed URL"),
    };
    let scheme = parsed.scheme().to_ascii_lowercase();
    match scheme.as_str() {
        "http" | "https" => {
            if parsed.host_str().is_some_and(|h| !h.is_empty()) {
                UrlClass::Http
            } else {
                UrlClass::Invalid("URL has no host")
            }
        }
        s if STREAM_SCHEMES.contains(&s) => UrlClass::Stream(scheme),
        s if PASSIVE_SCHEMES.contains(&s) => UrlClass::Passive(scheme),
        _ => UrlClass::Invalid("unsupported scheme"),
    }
}

/// Network prober: a `GET` per URL, status decided from the response line.
///
/// The body is never read; dropping the response closes the stream. On a
/// certificate or handshake failure the request is retried once with
/// verification disabled.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    insecure: Option<Client>,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Self {
        let client = Self::build_client(&config, false);
        let insecure = config
            .tls_fallback
            .then(|| Self::build_client(&config, true));
        Self {
            client,
            insecure,
            config,
        }
    }

    pub fn build_client(config: &ProbeConfig, accept_invalid_certs: bool) -> Client {
        Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.workers)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .expect("Failed to build HTTP client")
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    async fn probe_http(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();
        let result = with_tls_fallback(
            |lax| match (lax, &self.insecure) {
                (true, Some(insecure)) => insecure.get(url).send(),
                _ => self.client.get(url).send(),
            },
            self.insecure.is_some(),
            is_tls_error,
        )
        .await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                let status = response.status();
                drop(response);
                status_outcome(url, status).with_elapsed(elapsed)
            }
            Err(e) if e.is_timeout() => {
                debug!(url, "Probe timed out");
                ProbeOutcome::timed_out(
                    url,
                    format!("timeout after {}ms", self.config.request_timeout.as_millis()),
                )
            }
            Err(e) => {
                let reason = root_cause(&e);
                debug!(url, error = %reason, "Probe failed");
                ProbeOutcome::failed(url, format!("connection failed: {reason}"))
            }
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match classify(url, self.config.max_url_length) {
            UrlClass::Http => self.probe_http(url.trim()).await,
            UrlClass::Stream(scheme) => {
                ProbeOutcome::succeeded(url, format!("{scheme} stream (not probed)"))
            }
            UrlClass::Passive(scheme) => {
                ProbeOutcome::skipped(url, format!("{scheme} link not checked"))
            }
            UrlClass::Invalid(reason) => {
                warn!(url, reason, "Rejected URL without probing");
                ProbeOutcome::failed(url, reason)
            }
        }
    }
}

fn status_outcome(url: &str, status: StatusCode) -> ProbeOutcome {
    let code = status.as_u16();
    let text = match status.canonical_reason() {
        Some(reason) => format!("{code} {reason}"),
        None => code.to_string(),
    };
    if (200..400).contains(&code) {
        ProbeOutcome::succeeded(url, text).with_status_code(code)
    } else {
        ProbeOutcome::failed(url, format!("HTTP {text}")).with_status_code(code)
    }
}

/// Run `attempt(false)`, then `attempt(true)` once more when fallback is
/// enabled and the first error looks like a TLS failure.
async fn with_tls_fallback<T, E, F, Fut>(
    attempt: F,
    fallback: bool,
    is_tls: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn(bool) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match attempt(false).await {
        Err(e) if fallback && is_tls(&e) => {
            debug!(error = %e, "TLS failure, retrying without verification");
            attempt(true).await
        }
        other => other,
    }
}

fn is_tls_error(e: &reqwest::Error) -> bool {
    !e.is_timeout() && chain_mentions_tls(e.source())
}

fn chain_mentions_tls(mut source: Option<&(dyn std::error::Error + 'static)>) -> bool {
    while let Some(err) = source {
        if mentions_tls(&err.to_string()) {
            return true;
        }
        source = err.source();
    }
    false
}

fn mentions_tls(text: &str) -> bool {
    let text = text.to_lowercase();
    ["certificate", "tls", "ssl", "handshake", "corrupt message"]
        .iter()
        .any(|needle| text.contains(needle))
}

fn root_cause(e: &reqwest::Error) -> String {
    let mut last = e.to_string();
    let mut source = e.source();
    while let Some(err) = source {
        last = err.to_string();
        source = err.source();
    }
    last
}
