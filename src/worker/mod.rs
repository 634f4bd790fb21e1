/// Evaluation worker pool
///
/// One consumer task per broker channel, `consumer_max_concurrency` in
/// total. Each message is processed idempotently: terminal jobs are
/// acknowledged without re-running scoring, the `queued -> processing`
/// transition is conditional so the pool never races the sweeper, and the
/// per-job deadline bounds the whole pipeline run. Retriable failures go
/// back to the queue; non-retriable ones fail the job in place.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::ledger::{Evaluation, FjallLedger, JobStatus, LedgerError};
use crate::observability::Metrics;
use crate::pipeline::{EvalPipeline, PipelineOutput};
use crate::queue::{Envelope, EvalBroker};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wall-clock budget for one job, pipeline included.
    pub job_deadline: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_deadline: Duration::from_secs(120),
        }
    }
}

pub struct WorkerPool {
    tasks: JoinSet<()>,
}

struct WorkerContext {
    broker: Arc<EvalBroker>,
    ledger: Arc<FjallLedger>,
    pipeline: Arc<EvalPipeline>,
    config: WorkerConfig,
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    /// Spawn one consumer per receiver. Consumers run until their channel
    /// closes or the shutdown signal flips.
    pub fn spawn(
        receivers: Vec<mpsc::Receiver<Envelope>>,
        broker: Arc<EvalBroker>,
        ledger: Arc<FjallLedger>,
        pipeline: Arc<EvalPipeline>,
        config: WorkerConfig,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let context = Arc::new(WorkerContext {
            broker,
            ledger,
            pipeline,
            config,
            metrics,
        });

        let mut tasks = JoinSet::new();
        for (consumer_id, receiver) in receivers.into_iter().enumerate() {
            let context = Arc::clone(&context);
            let shutdown = shutdown.clone();
            tasks.spawn(run_consumer(consumer_id, receiver, context, shutdown));
        }
        info!(consumers = tasks.len(), "Worker pool started");
        Self { tasks }
    }

    /// Graceful shutdown: in-flight jobs get `grace` to finish, then their
    /// tasks are aborted (cancelling in-flight pipeline calls).
    pub async fn shutdown(mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown grace elapsed, aborting in-flight workers");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        info!("Worker pool stopped");
    }
}

async fn run_consumer(
    consumer_id: usize,
    mut receiver: mpsc::Receiver<Envelope>,
    context: Arc<WorkerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(consumer_id, "Consumer started");
    loop {
        tokio::select! {
            envelope = receiver.recv() => {
                match envelope {
                    Some(envelope) => process_message(&context, envelope).await,
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                debug!(consumer_id, "Consumer stopping on shutdown signal");
                break;
            }
        }
    }
    debug!(consumer_id, "Consumer stopped");
}

async fn process_message(context: &WorkerContext, envelope: Envelope) {
    let job_id = envelope.task.job_id.clone();
    let seq = envelope.seq;

    // Duplicate-delivery idempotency: a terminal job is done, whatever the
    // queue thinks.
    let job = match context.ledger.get_job(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(seq, job_id = %job_id, "Message references unknown job, dropping");
            ack(context, seq);
            return;
        }
        Err(err) => {
            warn!(seq, job_id = %job_id, error = %err, "Ledger read failed");
            context
                .broker
                .nack(envelope, &format!("ledger read failed: {err}"));
            return;
        }
    };
    if job.status.is_terminal() {
        debug!(seq, job_id = %job_id, status = %job.status, "Job already terminal, acknowledging duplicate");
        ack(context, seq);
        return;
    }

    // Conditional claim; a Conflict means the job went terminal since the
    // read above (e.g. the sweeper failed it) and there is nothing to run.
    match context
        .ledger
        .update_status(&job_id, JobStatus::Processing, None)
    {
        Ok(_) => {}
        Err(LedgerError::Conflict(_)) => {
            debug!(seq, job_id = %job_id, "Lost claim race, acknowledging");
            ack(context, seq);
            return;
        }
        Err(err) => {
            context
                .broker
                .nack(envelope, &format!("status update failed: {err}"));
            return;
        }
    }

    let deadline = context.config.job_deadline;
    match tokio::time::timeout(deadline, context.pipeline.run(&envelope.task)).await {
        Ok(Ok(output)) => complete_job(context, envelope, output).await,
        Ok(Err(err)) if err.is_retriable() => {
            warn!(seq, job_id = %job_id, error = %err, "Retriable pipeline failure, returning to queue");
            context.broker.nack(envelope, &err.to_string());
        }
        Ok(Err(err)) => {
            warn!(seq, job_id = %job_id, error = %err, "Pipeline failure, failing job");
            fail_job(context, &job_id, &err.to_string());
            ack(context, seq);
        }
        Err(_elapsed) => {
            let message = format!(
                "timeout: job exceeded {} seconds processing deadline",
                deadline.as_secs()
            );
            warn!(seq, job_id = %job_id, "Job deadline exceeded, failing job");
            fail_job(context, &job_id, &message);
            ack(context, seq);
        }
    }
}

async fn complete_job(context: &WorkerContext, envelope: Envelope, output: PipelineOutput) {
    let job_id = envelope.task.job_id.clone();
    let evaluation = Evaluation {
        job_id: job_id.clone(),
        cv_match_rate: output.cv_match_rate,
        cv_feedback: output.cv_feedback,
        project_score: output.project_score,
        project_feedback: output.project_feedback,
        overall_summary: output.overall_summary,
        created_at: Utc::now(),
    };

    if let Err(err) = context.ledger.upsert_result(&evaluation) {
        match err {
            // Range violations are a pipeline bug surfaced as schema
            // failure; retrying the same output cannot help.
            LedgerError::InvalidArgument(reason) => {
                fail_job(context, &job_id, &format!("schema invalid: {reason}"));
                ack(context, envelope.seq);
            }
            err => {
                warn!(job_id = %job_id, error = %err, "Result write failed, returning to queue");
                context
                    .broker
                    .nack(envelope, &format!("result write failed: {err}"));
            }
        }
        return;
    }

    match context
        .ledger
        .update_status(&job_id, JobStatus::Completed, None)
    {
        Ok(_) => {
            context.metrics.job_completed();
            info!(job_id = %job_id, "Job completed");
        }
        Err(LedgerError::Conflict(_)) => {
            // The sweeper failed the job while scoring finished; keep the
            // failed status authoritative and drop the orphan result.
            warn!(job_id = %job_id, "Job went terminal before completion, discarding result");
            if let Err(err) = context.ledger.delete_result(&job_id) {
                error!(job_id = %job_id, error = %err, "Failed to discard orphan result");
            }
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "Completion transition failed");
        }
    }
    ack(context, envelope.seq);
}

fn fail_job(context: &WorkerContext, job_id: &str, message: &str) {
    match context
        .ledger
        .update_status(job_id, JobStatus::Failed, Some(message))
    {
        Ok(_) => context.metrics.job_failed(),
        Err(LedgerError::Conflict(_)) => {
            debug!(job_id = %job_id, "Job already terminal, failure transition skipped");
        }
        Err(err) => error!(job_id = %job_id, error = %err, "Failure transition failed"),
    }
}

fn ack(context: &WorkerContext, seq: u64) {
    if let Err(err) = context.broker.ack(seq) {
        error!(seq, error = %err, "Acknowledge failed");
    }
}
