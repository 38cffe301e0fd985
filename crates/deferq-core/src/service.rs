//! Service lifecycle: subscription, worker pool, watchdog, ordered shutdown.

use std::future::Future;
use std::sync::Arc;

use crate::broker::Broker;
use crate::config::ServiceConfig;
use crate::ingest::IngestionHandler;
use crate::queue::WorkQueue;
use crate::watchdog::Watchdog;
use crate::worker::{Process, WorkerGroup};

/// How the service ended, reportable to a supervising process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The subscription ended and all accepted work drained.
    Completed,

    /// An unrecoverable error.
    Failed,

    /// Externally cancelled before completion.
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Completed => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Cancelled => -1,
        }
    }
}

/// Wires ingestion, the worker pool and the watchdog against one broker.
pub struct Service {
    broker: Arc<dyn Broker>,
    config: ServiceConfig,
    process: Arc<dyn Process>,
}

impl Service {
    pub fn new(broker: Arc<dyn Broker>, config: ServiceConfig, process: Arc<dyn Process>) -> Self {
        Self {
            broker,
            config,
            process,
        }
    }

    /// Run until the subscription ends or `shutdown` resolves.
    ///
    /// Stop order: watchdog first (no reaping during shutdown), then the
    /// work queue and workers, then the subscription.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> ExitStatus {
        tracing::info!(
            queue = %self.config.queue_name,
            workers = self.config.workers,
            "service starting"
        );

        let mut subscription = match self.broker.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(error = %err, "subscribe failed");
                return ExitStatus::Failed;
            }
        };

        let queue = Arc::new(WorkQueue::new());
        let ingest = Arc::new(IngestionHandler::new(Arc::clone(&queue), &self.config));

        let workers = WorkerGroup::spawn(
            &self.config,
            Arc::clone(&queue),
            Arc::clone(&self.broker),
            Arc::clone(&self.process),
        );
        let watchdog = Watchdog::new(Arc::clone(&self.broker), &self.config).spawn();

        // Subscription pump: one task per delivery, so a slow deferral for
        // one message never delays the next.
        let mut pump = tokio::spawn(async move {
            while let Some(delivery) = subscription.next().await {
                let ingest = Arc::clone(&ingest);
                tokio::spawn(async move {
                    let seq = delivery.seq;
                    if let Err(err) = ingest.handle(delivery).await {
                        tracing::error!(
                            %seq,
                            error = %err,
                            "ingestion failed, leaving message to broker redelivery"
                        );
                    }
                });
            }
        });

        tokio::pin!(shutdown);
        let status = tokio::select! {
            _ = &mut shutdown => ExitStatus::Cancelled,
            res = &mut pump => match res {
                Ok(()) => ExitStatus::Completed,
                Err(_) => ExitStatus::Failed,
            },
        };

        watchdog.shutdown_and_join().await;
        queue.close().await;

        match status {
            ExitStatus::Completed => {
                // Normal end of the subscription: drain what was accepted.
                workers.join().await;
            }
            _ => {
                // Cancelled or failed: abandon in-flight slices; their
                // messages stay deferred for broker-side recovery.
                workers.request_shutdown();
                workers.abort();
                pump.abort();
            }
        }

        tracing::info!(code = status.code(), "service stopped");
        status
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::retry::RetryPolicy;
    use crate::worker::SimulatedProcess;

    fn fast_config() -> ServiceConfig {
        ServiceConfig {
            expected_processing: Duration::from_millis(60),
            slice: Duration::from_millis(20),
            workers: 2,
            // The first tick fires immediately; keep later ticks out of the
            // way of these short-lived runs.
            watchdog_interval: Duration::from_secs(5),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn drains_accepted_work_and_completes() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.send(serde_json::json!({ "file": "a" })).await;
        broker.send(serde_json::json!({ "file": "b" })).await;

        let service = Service::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            fast_config(),
            Arc::new(SimulatedProcess),
        );

        let closer = tokio::spawn({
            let broker = Arc::clone(&broker);
            async move {
                // Give both items time to finish, then end the subscription.
                tokio::time::sleep(Duration::from_millis(400)).await;
                broker.close().await;
            }
        });

        let status = service.run(std::future::pending()).await;
        closer.await.unwrap();

        assert_eq!(status, ExitStatus::Completed);
        assert_eq!(status.code(), 0);

        let counts = broker.counts().await;
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.dead_lettered, 0);
        assert_eq!(counts.deferred, 0);
    }

    #[tokio::test]
    async fn external_cancellation_abandons_in_flight_work() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.send(serde_json::json!({ "file": "slow" })).await;

        let config = ServiceConfig {
            // Far longer than the test runs, so the item cannot finish.
            expected_processing: Duration::from_secs(60),
            slice: Duration::from_secs(60),
            ..fast_config()
        };
        let service = Service::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            config,
            Arc::new(SimulatedProcess),
        );

        let status = service
            .run(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .await;

        assert_eq!(status, ExitStatus::Cancelled);
        assert_eq!(status.code(), -1);

        // The abandoned message is still deferred, untouched by the
        // watchdog, recoverable after restart.
        let counts = broker.counts().await;
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.dead_lettered, 0);
        assert_eq!(counts.deferred, 1);
    }

    #[tokio::test]
    async fn watchdog_runs_alongside_the_pool() {
        let broker = Arc::new(InMemoryBroker::new());

        // A message deferred by a foreign producer, without a deadline: the
        // running service's watchdog must dead-letter it while normal
        // messages flow.
        broker.send(serde_json::json!({ "foreign": true })).await;
        {
            let mut sub = broker.subscribe().await.unwrap();
            let delivery = sub.next().await.unwrap();
            delivery
                .handle
                .defer(crate::domain::TrackedProperties::default())
                .await
                .unwrap();
        }

        let service = Service::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            fast_config(),
            Arc::new(SimulatedProcess),
        );

        let status = service
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
            .await;
        assert_eq!(status, ExitStatus::Cancelled);

        let dead = broker.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].reason,
            crate::domain::DeadLetterReason::MissingExpectedCompletion
        );
    }
}
