use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ledger::{FjallLedger, JobStatus};
use crate::observability::Metrics;
use crate::retry::Backoff;

use super::store::{FjallQueue, Result};
use super::task::EvalTask;

/// Envelope delivers a persisted task to a consumer, carrying the delivery
/// attempt so redeliveries count toward the retry budget.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub seq: u64,
    pub attempt: u32,
    pub task: EvalTask,
}

/// Per-message retry policy for the consumer group.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

/// EvalBroker distributes persisted tasks to the worker pool
///
/// Architecture:
/// 1. Admission calls `broker.enqueue(task)`
/// 2. Broker persists the task to FjallQueue (atomic, gets seq)
/// 3. Broker sends Envelope{seq, attempt: 1, task} to a consumer channel
/// 4. Round-robin distribution across the pool; bounded channels give
///    backpressure
/// 5. Consumers call `ack` on success or `nack` on retriable failure;
///    `nack` schedules redelivery with the shared backoff policy and, once
///    the budget is spent, parks the message on the DLQ and marks the job
///    failed (the reconciliation step)
///
/// Within this consumer group a message is owned by exactly one consumer at
/// a time; redelivery happens only after the owner gives it back.
pub struct EvalBroker {
    store: Arc<FjallQueue>,
    ledger: Arc<FjallLedger>,
    channels: Vec<mpsc::Sender<Envelope>>,
    next_consumer: AtomicUsize,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl EvalBroker {
    /// Create a broker with one channel per consumer. Returns the broker
    /// and the receivers the worker pool consumes from.
    pub fn new(
        store: Arc<FjallQueue>,
        ledger: Arc<FjallLedger>,
        num_consumers: usize,
        channel_capacity: usize,
        retry: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> (Self, Vec<mpsc::Receiver<Envelope>>) {
        info!(num_consumers, channel_capacity, "Creating EvalBroker");

        let mut channels = Vec::with_capacity(num_consumers);
        let mut receivers = Vec::with_capacity(num_consumers);
        for _ in 0..num_consumers {
            let (tx, rx) = mpsc::channel(channel_capacity);
            channels.push(tx);
            receivers.push(rx);
        }

        let broker = Self {
            store,
            ledger,
            channels,
            next_consumer: AtomicUsize::new(0),
            retry,
            metrics,
        };
        (broker, receivers)
    }

    /// Persist and dispatch a task; returns its sequence number. The task
    /// is durable before any consumer sees it, so a crash between the two
    /// steps is recovered by `recover()`.
    pub async fn enqueue(&self, task: EvalTask) -> Result<u64> {
        let seq = self.store.enqueue(&task)?;
        self.dispatch(Envelope {
            seq,
            attempt: 1,
            task,
        })
        .await;
        Ok(seq)
    }

    async fn dispatch(&self, envelope: Envelope) {
        let idx = self.next_consumer.fetch_add(1, Ordering::Relaxed) % self.channels.len();
        let seq = envelope.seq;
        if self.channels[idx].send(envelope).await.is_err() {
            // Consumer shut down; the task stays persisted and will be
            // re-dispatched by recover() on the next start.
            warn!(seq, consumer = idx, "Consumer channel closed, task left pending");
        } else {
            debug!(seq, consumer = idx, "Task dispatched");
        }
    }

    /// Acknowledge successful (or terminally handled) processing.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.store.ack(seq)
    }

    /// Negative-acknowledge after a retriable failure. Schedules a delayed
    /// redelivery, or routes the message to the DLQ once `max_retries`
    /// deliveries have failed — at which point the job itself is marked
    /// failed with the final reason.
    pub fn nack(&self, envelope: Envelope, reason: &str) {
        if envelope.attempt >= self.retry.max_retries {
            let seq = envelope.seq;
            let job_id = envelope.task.job_id.clone();
            warn!(seq, job_id = %job_id, attempts = envelope.attempt, reason, "Retries exhausted, dead-lettering");

            if let Err(err) = self
                .store
                .move_to_dlq(seq, reason.to_string(), envelope.attempt)
            {
                warn!(seq, error = %err, "Failed to move task to DLQ");
            }
            self.metrics.message_dead_lettered();

            // Reconciliation: the job would otherwise sit in `processing`
            // until the sweeper times it out with a generic message.
            match self
                .ledger
                .update_status(&job_id, JobStatus::Failed, Some(reason))
            {
                Ok(_) => self.metrics.job_failed(),
                Err(err) => debug!(job_id = %job_id, error = %err, "Job not transitioned on dead-letter"),
            }
            return;
        }

        let delay = self.retry.backoff.delay(envelope.attempt);
        let idx = self.next_consumer.fetch_add(1, Ordering::Relaxed) % self.channels.len();
        let sender = self.channels[idx].clone();
        let next = Envelope {
            seq: envelope.seq,
            attempt: envelope.attempt + 1,
            task: envelope.task,
        };
        self.metrics.message_retried();
        debug!(seq = next.seq, attempt = next.attempt, delay_ms = delay.as_millis() as u64, "Scheduling redelivery");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A closed channel means shutdown won the race; the persisted
            // task is recovered on the next start.
            let _ = sender.send(next).await;
        });
    }

    /// Re-dispatch every unacknowledged task (crash recovery). Attempts
    /// restart at 1; delivery is at-least-once.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.pending()?;
        let count = pending.len();
        for (seq, task) in pending {
            self.dispatch(Envelope {
                seq,
                attempt: 1,
                task,
            })
            .await;
        }
        if count > 0 {
            info!(count, "Re-dispatched pending tasks after restart");
        }
        Ok(count)
    }

    pub fn num_consumers(&self) -> usize {
        self.channels.len()
    }

    /// All consumer channels still open.
    pub fn health_check(&self) -> bool {
        self.channels.iter().all(|ch| !ch.is_closed())
    }
}
