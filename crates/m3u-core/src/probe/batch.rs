use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ProbeOutcome, ProbeState, Prober};
use crate::config::ProbeConfig;
use crate::playlist::UrlStatus;
use crate::pool::WorkerPool;

/// One finished input, streamed back as soon as it is known.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Position of the URL in the caller's input list.
    pub index: usize,
    pub outcome: ProbeOutcome,
    /// Reports delivered so far, this one included.
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Distinct URLs actually handed to the prober.
    pub probed: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub unknown: usize,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl BatchSummary {
    fn record(&mut self, outcome: &ProbeOutcome) {
        match outcome.status {
            UrlStatus::Reachable => self.reachable += 1,
            UrlStatus::Unreachable => self.unreachable += 1,
            UrlStatus::Unknown => self.unknown += 1,
        }
    }
}

/// Lifecycle of every distinct URL in a batch. Workers mark their unit
/// dispatched; the coordinator settles it exactly once.
#[derive(Debug)]
struct UnitStates(Mutex<Vec<ProbeState>>);

impl UnitStates {
    fn new(len: usize) -> Self {
        Self(Mutex::new(vec![ProbeState::Pending; len]))
    }

    fn get(&self, slot: usize) -> ProbeState {
        self.lock()[slot]
    }

    /// Move `slot` to `next` if the lifecycle allows it.
    fn advance(&self, slot: usize, next: ProbeState) -> bool {
        let mut states = self.lock();
        let current = states[slot];
        if current.can_transition_to(next) {
            states[slot] = next;
            true
        } else {
            debug!(slot, from = %current, to = %next, "Rejected probe state transition");
            false
        }
    }

    /// Terminal outcome to report for `slot`, or `None` once it has settled.
    /// A prober answering with a non-terminal state counts as a failure.
    fn settle(&self, slot: usize, url: &str, outcome: ProbeOutcome) -> Option<ProbeOutcome> {
        if self.advance(slot, outcome.state) {
            return Some(outcome);
        }
        if self.get(slot).is_terminal() {
            return None;
        }
        let failed = ProbeOutcome::failed(
            url,
            format!("prober returned non-terminal state {}", outcome.state),
        );
        self.advance(slot, ProbeState::Failed).then_some(failed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProbeState>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Probe `urls` with at most `config.workers` requests in flight.
///
/// Duplicate URLs are probed once and the outcome fanned out to every index
/// that holds them. A probe still running after `config.request_timeout` is
/// reported as timed out whatever the prober does internally.
///
/// Every input index receives exactly one report; indices left over after
/// cancellation or the batch deadline are reported as cancelled or timed out
/// once the pool has stopped.
pub async fn probe_batch<P, F>(
    prober: &P,
    urls: &[String],
    config: &ProbeConfig,
    token: CancellationToken,
    mut on_report: F,
) -> BatchSummary
where
    P: Prober + ?Sized,
    F: FnMut(ProbeReport),
{
    let total = urls.len();
    let mut distinct: Vec<String> = Vec::new();
    let mut owners: Vec<Vec<usize>> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (idx, url) in urls.iter().enumerate() {
        let key = url.trim();
        match seen.get(key) {
            Some(&slot) => owners[slot].push(idx),
            None => {
                seen.insert(key, distinct.len());
                distinct.push(key.to_string());
                owners.push(vec![idx]);
            }
        }
    }

    info!(total, distinct = distinct.len(), workers = config.workers, "Probing URLs");

    let pool = WorkerPool::new(config.workers, token)
        .with_stop_grace(config.stop_grace)
        .with_deadline(config.batch_deadline);

    let mut summary = BatchSummary {
        total,
        probed: distinct.len(),
        ..BatchSummary::default()
    };
    let mut completed = 0usize;
    let mut emit = |slot: usize, outcome: &ProbeOutcome, summary: &mut BatchSummary| {
        for &index in &owners[slot] {
            completed += 1;
            summary.record(outcome);
            on_report(ProbeReport {
                index,
                outcome: outcome.clone(),
                completed,
                total,
            });
        }
    };

    let states = UnitStates::new(distinct.len());
    let states_ref = &states;
    let request_timeout = config.request_timeout;
    let pool_summary = pool
        .run(
            distinct.clone(),
            |slot, url| async move {
                states_ref.advance(slot, ProbeState::Dispatched);
                match tokio::time::timeout(request_timeout, prober.probe(&url)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::timed_out(
                        &url,
                        format!("timeout after {}ms", request_timeout.as_millis()),
                    ),
                }
            },
            |slot, outcome, _, _| {
                if let Some(outcome) = states.settle(slot, &distinct[slot], outcome) {
                    emit(slot, &outcome, &mut summary);
                }
            },
        )
        .await;

    for &slot in &pool_summary.unfinished {
        let url = &distinct[slot];
        let outcome = if pool_summary.cancelled {
            ProbeOutcome::cancelled(url)
        } else {
            ProbeOutcome::deadline_reached(url)
        };
        if let Some(outcome) = states.settle(slot, url, outcome) {
            emit(slot, &outcome, &mut summary);
        }
    }

    summary.cancelled = pool_summary.cancelled;
    summary.timed_out = pool_summary.timed_out;
    info!(
        total,
        reachable = summary.reachable,
        unreachable = summary.unreachable,
        unknown = summary.unknown,
        cancelled = summary.cancelled,
        "Probe batch finished"
    );
    summary
}

/// Spawn [`probe_batch`] and stream its reports.
///
/// The channel closes once every report has been sent; the join handle
/// yields the summary.
pub fn probe_stream(
    prober: Arc<dyn Prober>,
    urls: Vec<String>,
    config: ProbeConfig,
    token: CancellationToken,
) -> (mpsc::UnboundedReceiver<ProbeReport>, JoinHandle<BatchSummary>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        probe_batch(prober.as_ref(), &urls, &config, token, |report| {
            let _ = tx.send(report);
        })
        .await
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{HttpProber, ProbeState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingProber {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, url: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if url.contains("dead") {
                ProbeOutcome::failed(url, "HTTP 404 Not Found").with_status_code(404)
            } else {
                ProbeOutcome::succeeded(url, "200 OK").with_status_code(200)
            }
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_probed_once_and_fanned_out() {
        let prober = CountingProber {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        };
        let input = urls(&["http://a/1", "http://a/dead", "http://a/1", " http://a/1 "]);
        let mut reports = Vec::new();
        let summary = probe_batch(
            &prober,
            &input,
            &ProbeConfig::default(),
            CancellationToken::new(),
            |r| reports.push(r),
        )
        .await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.reachable, 3);
        assert_eq!(summary.unreachable, 1);
        let mut indices: Vec<_> = reports.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let progress: Vec<_> = reports.iter().map(|r| r.completed).collect();
        assert_eq!(progress, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batch_reports_every_index_once() {
        let prober = CountingProber {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        };
        let input: Vec<String> = (0..6).map(|i| format!("http://a/{i}")).collect();
        let token = CancellationToken::new();
        let canceller = token.clone();
        let config = ProbeConfig::default().with_workers(2);

        let mut reports = Vec::new();
        let summary = probe_batch(&prober, &input, &config, token, |r| {
            canceller.cancel();
            reports.push(r);
        })
        .await;

        assert!(summary.cancelled);
        assert_eq!(reports.len(), 6);
        let cancelled = reports
            .iter()
            .filter(|r| r.outcome.state == ProbeState::Cancelled)
            .count();
        assert_eq!(cancelled, 5);
        assert!(prober.calls.load(Ordering::SeqCst) <= 3);
        let mut indices: Vec<_> = reports.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_prober_is_cut_off_at_request_timeout() {
        let prober = CountingProber {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(60),
        };
        let config = ProbeConfig::default().with_request_timeout(500);
        let mut reports = Vec::new();
        probe_batch(&prober, &urls(&["http://a/1"]), &config, CancellationToken::new(), |r| {
            reports.push(r)
        })
        .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome.state, ProbeState::TimedOut);
        assert_eq!(reports[0].outcome.status, UrlStatus::Unreachable);
    }

    #[test]
    fn unit_lifecycle_settles_once() {
        let states = UnitStates::new(2);
        assert_eq!(states.get(0), ProbeState::Pending);
        assert!(states.advance(0, ProbeState::Dispatched));
        assert!(!states.advance(0, ProbeState::Dispatched));

        let done = states.settle(0, "http://a/1", ProbeOutcome::succeeded("http://a/1", "200 OK"));
        assert_eq!(done.map(|o| o.state), Some(ProbeState::Succeeded));
        assert!(states
            .settle(0, "http://a/1", ProbeOutcome::cancelled("http://a/1"))
            .is_none());
        assert_eq!(states.get(0), ProbeState::Succeeded);

        // never dispatched: only a stop can settle it
        assert!(!states.advance(1, ProbeState::Succeeded));
        let stopped = states.settle(1, "http://a/2", ProbeOutcome::cancelled("http://a/2"));
        assert_eq!(stopped.map(|o| o.state), Some(ProbeState::Cancelled));
    }

    struct StuckProber;

    #[async_trait]
    impl Prober for StuckProber {
        async fn probe(&self, url: &str) -> ProbeOutcome {
            let mut outcome = ProbeOutcome::succeeded(url, "200 OK");
            outcome.state = ProbeState::Dispatched;
            outcome
        }
    }

    #[tokio::test]
    async fn non_terminal_answer_is_reported_as_failure() {
        let mut reports = Vec::new();
        let summary = probe_batch(
            &StuckProber,
            &urls(&["http://a/1", "http://a/1"]),
            &ProbeConfig::default(),
            CancellationToken::new(),
            |r| reports.push(r),
        )
        .await;
        assert_eq!(reports.len(), 2);
        assert!(reports
            .iter()
            .all(|r| r.outcome.state == ProbeState::Failed && r.outcome.url == "http://a/1"));
        assert_eq!(summary.unreachable, 2);
    }

    #[tokio::test]
    async fn worker_bound_caps_wall_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let input: Vec<String> = (0..8).map(|i| format!("{}/ch/{i}", server.uri())).collect();
        let config = ProbeConfig::default().with_workers(4);
        let prober = HttpProber::new(config.clone());

        let start = Instant::now();
        let summary = probe_batch(&prober, &input, &config, CancellationToken::new(), |_| {}).await;
        let elapsed = start.elapsed();

        assert_eq!(summary.reachable, 8);
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn stream_closes_after_last_report() {
        let prober: Arc<dyn Prober> = Arc::new(CountingProber {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let (mut rx, handle) = probe_stream(
            prober,
            urls(&["http://a/1", "http://a/dead"]),
            ProbeConfig::default(),
            CancellationToken::new(),
        );
        let mut received = 0;
        while let Some(report) = rx.recv().await {
            assert_eq!(report.total, 2);
            received += 1;
        }
        assert_eq!(received, 2);
        let summary = handle.await.unwrap();
        assert_eq!(summary.unreachable, 1);
    }
}
