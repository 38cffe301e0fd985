//! Deferral watchdog: audits deferred messages against their deadlines.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broker::Broker;
use crate::config::ServiceConfig;
use crate::domain::{DeadLetterReason, SequenceNumber};
use crate::error::DeferqError;

/// Periodic audit of deferred messages.
///
/// Each tick peeks a bounded window near the head of the queue and
/// dead-letters deferred messages that either carry no expected-completion
/// deadline (protocol violation) or whose deadline has passed. Messages
/// still inside their deadline are left alone.
pub struct Watchdog {
    broker: Arc<dyn Broker>,
    interval: Duration,
    peek_window: usize,
}

impl Watchdog {
    pub fn new(broker: Arc<dyn Broker>, config: &ServiceConfig) -> Self {
        Self {
            broker,
            interval: config.watchdog_interval,
            peek_window: config.peek_window,
        }
    }

    /// Spawn the watchdog loop; the handle stops it.
    pub fn spawn(self) -> WatchdogHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        WatchdogHandle { shutdown_tx, join }
    }

    async fn run(self, shutdown_rx: &mut watch::Receiver<bool>) {
        tracing::debug!("watchdog started");

        // Fixed-rate, non-overlapping: a tick that overruns the interval is
        // skipped, never run concurrently with the next.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // A failed tick is logged and skipped; the timer stays
                    // on schedule.
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "watchdog tick failed, skipping");
                    }
                }
            }
        }

        tracing::debug!("watchdog stopped");
    }

    /// One audit pass over the peek window.
    pub async fn tick(&self) -> Result<(), DeferqError> {
        let records = self.broker.peek(self.peek_window).await?;

        for record in records {
            if !record.state.is_deferred() {
                continue;
            }
            tracing::debug!(seq = %record.seq, "message is deferred");

            let verdict = match record.properties.expected_completion {
                None => {
                    let violation = DeferqError::ProtocolViolation(record.seq);
                    tracing::warn!(error = %violation, "deferred message breaks the deadline contract");
                    Some(DeadLetterReason::MissingExpectedCompletion)
                }
                Some(deadline) if Utc::now() > deadline => {
                    Some(DeadLetterReason::ExceededExpectedCompletion)
                }
                Some(_) => None,
            };

            if let Some(reason) = verdict {
                self.reap(record.seq, reason).await;
            }
        }

        Ok(())
    }

    /// Dead-letter one overdue or untracked message. Losing the re-acquire
    /// race to a worker that finalized the message in the meantime is
    /// expected, not corruption.
    async fn reap(&self, seq: SequenceNumber, reason: DeadLetterReason) {
        let outcome = match self.broker.receive_deferred(seq).await {
            Ok(lease) => lease.dead_letter(reason).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                tracing::warn!(%seq, reason = reason.as_str(), "dead-lettered deferred message");
            }
            Err(err) if err.is_race_loss() => {
                tracing::debug!(%seq, "message already finalized, skipping");
            }
            Err(err) => {
                tracing::error!(%seq, error = %err, "failed to dead-letter message");
            }
        }
    }
}

/// Handle to a spawned watchdog.
pub struct WatchdogHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WatchdogHandle {
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
