mod batch;
mod http;
mod state;

pub use batch::{probe_batch, probe_stream, BatchSummary, ProbeReport};
pub use http::{classify, HttpProber, UrlClass};
pub use state::{ProbeOutcome, ProbeState};

use async_trait::async_trait;

/// Checks whether a single URL is reachable.
///
/// Implementations never fail: every problem is folded into the returned
/// outcome. They must be `Send + Sync` to be shared across the worker pool.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}
