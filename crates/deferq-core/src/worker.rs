//! Worker pool: timed-slice processing with progress re-deferral.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::config::ServiceConfig;
use crate::domain::{TrackedProperties, WorkItem};
use crate::error::DeferqError;
use crate::queue::WorkQueue;
use crate::retry::{self, RetryPolicy};

/// The long-running work itself, executed one timed slice at a time.
///
/// The worker loop owns the cadence: it calls `run_slice` repeatedly, and
/// between slices it re-defers the message with updated progress so the
/// broker never sees the lock go stale.
#[async_trait]
pub trait Process: Send + Sync {
    async fn run_slice(&self, item: &WorkItem, slice: Duration) -> Result<(), DeferqError>;
}

/// Demo implementation: the work is pure elapsed time.
pub struct SimulatedProcess;

#[async_trait]
impl Process for SimulatedProcess {
    async fn run_slice(&self, _item: &WorkItem, slice: Duration) -> Result<(), DeferqError> {
        tokio::time::sleep(slice).await;
        Ok(())
    }
}

/// Everything a worker needs, cheap to clone per worker.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<WorkQueue>,
    broker: Arc<dyn Broker>,
    process: Arc<dyn Process>,
    expected: Duration,
    slice: Duration,
    retry: RetryPolicy,
}

/// Worker group handle.
/// - `request_shutdown()` stops taking new items; in-flight items still run
///   to their disposition.
/// - `join()` waits for all workers (close the queue first, or nothing ends).
/// - `abort()` abandons in-flight slices; their messages stay deferred for
///   the broker's lock-expiry/redelivery to recover.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `config.workers` workers pulling from `queue`.
    pub fn spawn(
        config: &ServiceConfig,
        queue: Arc<WorkQueue>,
        broker: Arc<dyn Broker>,
        process: Arc<dyn Process>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = WorkerContext {
            queue,
            broker,
            process,
            expected: config.expected_processing,
            slice: config.slice,
            retry: config.retry.clone(),
        };

        let mut joins = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let ctx = ctx.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new items. Does not cancel an in-flight slice.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all workers to exit.
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
    }

    /// Abandon all workers immediately, mid-slice included.
    pub fn abort(self) {
        for join in &self.joins {
            join.abort();
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let item = tokio::select! {
            res = shutdown_rx.changed() => {
                if res.is_err() {
                    break;
                }
                continue;
            }
            item = ctx.queue.pop() => item,
        };

        // None means the queue closed and drained: normal end of work.
        let Some(item) = item else {
            break;
        };

        if let Err(err) = process_item(worker_id, &ctx, &item).await {
            if err.is_race_loss() {
                tracing::warn!(
                    worker_id,
                    seq = %item.seq(),
                    "another actor finalized the message, abandoning item"
                );
            } else {
                // Abandon the item, keep the worker. The deferred message is
                // reconciled by the watchdog deadline or broker redelivery.
                tracing::error!(
                    worker_id,
                    seq = %item.seq(),
                    error = %err,
                    "processing failed, abandoning item"
                );
            }
        }
    }
}

/// Run one item to its disposition: slices with progress re-deferral, then
/// completion once the cumulative slice time reaches the expected duration.
async fn process_item(
    worker_id: usize,
    ctx: &WorkerContext,
    item: &WorkItem,
) -> Result<(), DeferqError> {
    let seq = item.seq();
    tracing::info!(
        worker_id,
        %seq,
        expected_secs = ctx.expected.as_secs_f64(),
        "starting work item"
    );

    let mut elapsed = Duration::ZERO;
    while elapsed < ctx.expected {
        // The last slice is clamped so the item finishes at exactly the
        // expected elapsed time and percent never overshoots 100.
        let slice = ctx.slice.min(ctx.expected - elapsed);
        ctx.process.run_slice(item, slice).await?;
        elapsed += slice;

        let percent = elapsed.as_secs_f64() * 100.0 / ctx.expected.as_secs_f64();
        retry::retry(&ctx.retry, "defer", move || async move {
            let lease = ctx.broker.receive_deferred(seq).await?;
            lease
                .defer(TrackedProperties::with_percent_done(percent))
                .await
        })
        .await?;
        tracing::info!(worker_id, %seq, percent, "progress re-deferred");
    }

    retry::retry(&ctx.retry, "complete", move || async move {
        let lease = ctx.broker.receive_deferred(seq).await?;
        lease.complete().await
    })
    .await?;
    tracing::info!(worker_id, %seq, "work item completed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::domain::MessageState;

    /// Process that counts slices and optionally fails on one of them.
    struct TickingProcess {
        slices: AtomicU32,
        fail_on_slice: Option<u32>,
    }

    impl TickingProcess {
        fn new(fail_on_slice: Option<u32>) -> Self {
            Self {
                slices: AtomicU32::new(0),
                fail_on_slice,
            }
        }
    }

    #[async_trait]
    impl Process for TickingProcess {
        async fn run_slice(&self, _item: &WorkItem, slice: Duration) -> Result<(), DeferqError> {
            let n = self.slices.fetch_add(1, Ordering::Relaxed) + 1;
            if self.fail_on_slice == Some(n) {
                return Err(DeferqError::Other(format!("slice {n} blew up")));
            }
            tokio::time::sleep(slice).await;
            Ok(())
        }
    }

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            expected_processing: Duration::from_millis(100),
            slice: Duration::from_millis(25),
            workers: 2,
            ..ServiceConfig::default()
        }
    }

    fn context(broker: &Arc<InMemoryBroker>, process: Arc<dyn Process>) -> WorkerContext {
        let config = test_config();
        WorkerContext {
            queue: Arc::new(WorkQueue::new()),
            broker: Arc::clone(broker) as Arc<dyn Broker>,
            process,
            expected: config.expected_processing,
            slice: config.slice,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
        }
    }

    /// Send one message and park it in Deferred state, the way ingestion
    /// leaves it for the workers.
    async fn deferred_item(broker: &Arc<InMemoryBroker>) -> WorkItem {
        broker.send(serde_json::json!({})).await;
        let mut sub = broker.subscribe().await.unwrap();
        let delivery = sub.next().await.unwrap();
        let seq = delivery.seq;
        let payload = delivery.payload.clone();
        let deadline = chrono::Utc::now() + chrono::Duration::hours(1);
        delivery
            .handle
            .defer(TrackedProperties::with_expected_completion(deadline))
            .await
            .unwrap();
        WorkItem::new(seq, payload)
    }

    #[tokio::test]
    async fn item_is_completed_after_the_expected_duration() {
        let broker = Arc::new(InMemoryBroker::new());
        let process = Arc::new(TickingProcess::new(None));
        let ctx = context(&broker, Arc::clone(&process) as Arc<dyn Process>);

        let item = deferred_item(&broker).await;
        let seq = item.seq();

        process_item(0, &ctx, &item).await.unwrap();

        assert_eq!(broker.completed().await, vec![seq]);
        // 100ms of work in 25ms slices
        assert_eq!(process.slices.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn failure_mid_item_leaves_progress_behind() {
        let broker = Arc::new(InMemoryBroker::new());
        let process = Arc::new(TickingProcess::new(Some(3)));
        let ctx = context(&broker, process as Arc<dyn Process>);

        let item = deferred_item(&broker).await;
        let seq = item.seq();

        let err = process_item(0, &ctx, &item).await.unwrap_err();
        assert!(matches!(err, DeferqError::Other(_)));

        // Two of four slices got through, so the abandoned message still
        // carries their progress and its original deadline.
        let peeked = broker.peek(10).await.unwrap();
        assert_eq!(peeked[0].seq, seq);
        assert_eq!(peeked[0].state, MessageState::Deferred);
        let percent = peeked[0].properties.percent_done.unwrap();
        assert!((percent - 50.0).abs() < 1e-6, "percent was {percent}");
        assert!(peeked[0].properties.expected_completion.is_some());
        assert!(broker.completed().await.is_empty());
    }

    #[tokio::test]
    async fn group_drains_the_queue_after_close() {
        let broker = Arc::new(InMemoryBroker::new());
        let queue = Arc::new(WorkQueue::new());
        let config = test_config();

        let mut seqs = Vec::new();
        for _ in 0..3 {
            let item = deferred_item(&broker).await;
            seqs.push(item.seq());
            queue.push(item).await.unwrap();
        }
        queue.close().await;

        let group = WorkerGroup::spawn(
            &config,
            Arc::clone(&queue),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(SimulatedProcess),
        );
        group.join().await;

        let mut completed = broker.completed().await;
        completed.sort();
        assert_eq!(completed, seqs);
    }

    #[tokio::test]
    async fn request_shutdown_stops_idle_workers() {
        let broker = Arc::new(InMemoryBroker::new());
        let queue = Arc::new(WorkQueue::new());
        let config = test_config();

        let group = WorkerGroup::spawn(
            &config,
            queue,
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(SimulatedProcess),
        );

        group.request_shutdown();
        // join returns promptly even though the queue never closed
        tokio::time::timeout(Duration::from_secs(1), group.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn race_loss_mid_item_is_reported_as_such() {
        let broker = Arc::new(InMemoryBroker::new());
        let process = Arc::new(TickingProcess::new(None));
        let ctx = context(&broker, process as Arc<dyn Process>);

        let item = deferred_item(&broker).await;

        // Someone else finalizes the message while the worker is mid-slice.
        let lease = broker.receive_deferred(item.seq()).await.unwrap();
        lease.complete().await.unwrap();

        let err = process_item(0, &ctx, &item).await.unwrap_err();
        assert!(err.is_race_loss());
        assert_eq!(broker.completed().await, vec![item.seq()]);
    }

    #[test]
    fn percent_formula_tracks_elapsed_over_expected() {
        // 30s into an expected 180s is one sixth of the way.
        let elapsed = Duration::from_secs(30);
        let expected = Duration::from_secs(180);
        let percent = elapsed.as_secs_f64() * 100.0 / expected.as_secs_f64();
        assert!((percent - 16.666).abs() < 0.01);
    }
}
