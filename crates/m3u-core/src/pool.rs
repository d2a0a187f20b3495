use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a pool run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub total: usize,
    /// Units whose result was handed to the caller.
    pub completed: usize,
    /// Units that finished after cancellation and were dropped.
    pub discarded: usize,
    /// Indices that never produced a delivered result, ascending.
    pub unfinished: Vec<usize>,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl PoolSummary {
    pub fn is_complete(&self) -> bool {
        self.unfinished.is_empty()
    }
}

/// Bounded executor for independent units of work.
///
/// At most `workers` units run at once. Results are delivered in completion
/// order together with the unit's input index. The cancellation token is
/// checked before each unit starts and before each result is delivered;
/// after cancellation, in-flight units get `stop_grace` to finish before the
/// pool stops waiting and drops them.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    stop_grace: Duration,
    deadline: Option<Duration>,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, token: CancellationToken) -> Self {
        Self {
            workers: workers.max(1),
            stop_grace: Duration::from_secs(5),
            deadline: None,
            token,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run `work` over `items`, calling `on_result(index, result, completed,
    /// total)` on the caller's task as each unit finishes.
    pub async fn run<T, R, F, Fut, C>(&self, items: Vec<T>, work: F, mut on_result: C) -> PoolSummary
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R>,
        C: FnMut(usize, R, usize, usize),
    {
        let total = items.len();
        let mut delivered = vec![false; total];
        let mut summary = PoolSummary {
            total,
            ..PoolSummary::default()
        };
        if total == 0 {
            return summary;
        }

        info!(total, workers = self.workers, "Worker pool started");

        let token = self.token.clone();
        let work = &work;
        let mut results = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| {
                let token = token.clone();
                async move {
                    if token.is_cancelled() {
                        return (idx, None);
                    }
                    (idx, Some(work(idx, item).await))
                }
            })
            .buffer_unordered(self.workers);

        let mut deadline = self.deadline.map(|d| Instant::now() + d);

        loop {
            let wait_until = deadline;
            let expired = async move {
                match wait_until {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                _ = self.token.cancelled(), if !summary.cancelled => {
                    summary.cancelled = true;
                    let grace = Instant::now() + self.stop_grace;
                    deadline = Some(deadline.map_or(grace, |d| d.min(grace)));
                    debug!(completed = summary.completed, total, "Worker pool cancellation observed");
                }
                next = results.next() => match next {
                    Some((idx, Some(result))) => {
                        if summary.cancelled || self.token.is_cancelled() {
                            summary.discarded += 1;
                            continue;
                        }
                        delivered[idx] = true;
                        summary.completed += 1;
                        on_result(idx, result, summary.completed, total);
                    }
                    Some((_, None)) => {}
                    None => break,
                },
                _ = expired => {
                    if !summary.cancelled {
                        summary.timed_out = true;
                        warn!(completed = summary.completed, total, "Worker pool deadline reached");
                    } else {
                        warn!(completed = summary.completed, total, "Worker pool force-stopped after grace period");
                    }
                    break;
                }
            }
        }

        summary.unfinished = delivered
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i)
            .collect();

        info!(
            total,
            completed = summary.completed,
            discarded = summary.discarded,
            cancelled = summary.cancelled,
            timed_out = summary.timed_out,
            "Worker pool finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn respects_worker_bound_and_reports_every_index() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3, CancellationToken::new());

        let mut seen = Vec::new();
        let mut progress = Vec::new();
        let summary = pool
            .run(
                (0..10u64).collect(),
                |_, item| {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10 * (10 - item))).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        item * 2
                    }
                },
                |idx, result, completed, total| {
                    assert_eq!(result, idx as u64 * 2);
                    assert_eq!(total, 10);
                    seen.push(idx);
                    progress.push(completed);
                },
            )
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(summary.is_complete());
        assert_eq!(summary.completed, 10);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(progress, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_dispatch_and_discards_late_results() {
        let token = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2, token.clone()).with_stop_grace(Duration::from_secs(1));

        let canceller = token.clone();
        let summary = pool
            .run(
                (0..8usize).collect(),
                |_, item| {
                    let started = started.clone();
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(if item == 0 { 10 } else { 50 }))
                            .await;
                        item
                    }
                },
                |_, _, _, _| canceller.cancel(),
            )
            .await;

        assert!(summary.cancelled);
        assert!(!summary.timed_out);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.unfinished.len(), 7);
        assert!(started.load(Ordering::SeqCst) <= 3);
        assert_eq!(summary.discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_a_hung_unit() {
        let pool = WorkerPool::new(4, CancellationToken::new())
            .with_deadline(Some(Duration::from_millis(100)));
        let begin = Instant::now();
        let summary = pool
            .run(
                vec![1u64, 3600],
                |_, secs| async move {
                    tokio::time::sleep(Duration::from_millis(secs)).await;
                    secs
                },
                |_, _, _, _| {},
            )
            .await;

        assert!(summary.timed_out);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.unfinished, vec![1]);
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_workers_clamped_and_empty_input() {
        let pool = WorkerPool::new(0, CancellationToken::new());
        assert_eq!(pool.workers(), 1);
        let summary = pool
            .run(Vec::<u8>::new(), |_, x| async move { x }, |_, _, _, _| {})
            .await;
        assert_eq!(summary.total, 0);
        assert!(summary.is_complete());
    }
}
