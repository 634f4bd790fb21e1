//! Stuck-job sweeper
//!
//! A worker that dies mid-job leaves it in `processing` with a stale
//! `updated_at`. This loop periodically fails such jobs so clients get a
//! terminal answer instead of polling forever. It pages through the ledger
//! in bounded chunks and tolerates losing races: a job that completed
//! between listing and update is protected by the ledger's monotonicity
//! guard.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ledger::{FjallLedger, JobStatus, LedgerError};
use crate::observability::Metrics;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Tick interval.
    pub interval: Duration,
    /// A `processing` job with `updated_at` older than this is stuck.
    pub max_processing_age: Duration,
    /// Jobs examined per page.
    pub page_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_processing_age: Duration::from_secs(180),
            page_size: 100,
        }
    }
}

pub struct Sweeper {
    ledger: Arc<FjallLedger>,
    config: SweeperConfig,
    metrics: Arc<Metrics>,
}

impl Sweeper {
    pub fn new(ledger: Arc<FjallLedger>, config: SweeperConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            config,
            metrics,
        }
    }

    /// One full sweep; returns how many jobs were failed.
    pub fn sweep_once(&self) -> Result<usize, LedgerError> {
        let max_age = chrono::Duration::from_std(self.config.max_processing_age)
            .unwrap_or_else(|_| chrono::Duration::minutes(3));
        let cutoff = Utc::now() - max_age;
        let message = format!(
            "timeout: job stuck in processing beyond maximum age of {} seconds",
            self.config.max_processing_age.as_secs()
        );

        // List first, update after: sweeping moves jobs out of the
        // `processing` filter and would shift page offsets mid-scan.
        let mut stale = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.ledger.list_jobs(
                offset,
                self.config.page_size,
                None,
                Some(JobStatus::Processing),
            )?;
            let page_len = page.len();
            stale.extend(
                page.into_iter()
                    .filter(|job| job.updated_at < cutoff)
                    .map(|job| job.id),
            );
            if page_len < self.config.page_size {
                break;
            }
            offset += page_len;
        }

        let mut swept = 0;
        for job_id in stale {
            match self
                .ledger
                .update_status(&job_id, JobStatus::Failed, Some(&message))
            {
                Ok(_) => {
                    info!(job_id = %job_id, "Swept stuck job");
                    self.metrics.job_swept();
                    self.metrics.job_failed();
                    swept += 1;
                }
                // Completed or failed since the listing; monotonicity
                // already protected it.
                Err(LedgerError::Conflict(_)) => {
                    debug!(job_id = %job_id, "Job finished before sweep, skipping");
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Sweep transition failed");
                }
            }
        }
        Ok(swept)
    }

    /// Background loop; runs until the shutdown signal flips.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.interval.as_secs(),
                max_age_secs = self.config.max_processing_age.as_secs(),
                "Sweeper started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {
                        match self.sweep_once() {
                            Ok(0) => {}
                            Ok(swept) => info!(swept, "Sweeper tick finished"),
                            Err(err) => warn!(error = %err, "Sweeper tick failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewJob, NewUpload, UploadKind};
    use tempfile::TempDir;

    fn setup() -> (Arc<FjallLedger>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let ledger = Arc::new(FjallLedger::open(tmp.path().join("ledger")).unwrap());
        (ledger, tmp)
    }

    fn seed_processing_job(ledger: &FjallLedger) -> String {
        let cv = ledger
            .create_upload(NewUpload {
                kind: UploadKind::Cv,
                text: "cv".into(),
                filename: "cv.txt".into(),
                mime: "text/plain".into(),
                size: 2,
            })
            .unwrap();
        let project = ledger
            .create_upload(NewUpload {
                kind: UploadKind::Project,
                text: "p".into(),
                filename: "p.txt".into(),
                mime: "text/plain".into(),
                size: 1,
            })
            .unwrap();
        let job = ledger
            .create_job(NewJob {
                cv_id: cv.id,
                project_id: project.id,
                idempotency_key: None,
            })
            .unwrap();
        ledger
            .update_status(&job.id, JobStatus::Processing, None)
            .unwrap();
        job.id
    }

    fn sweeper(ledger: &Arc<FjallLedger>, max_age: Duration) -> Sweeper {
        Sweeper::new(
            Arc::clone(ledger),
            SweeperConfig {
                interval: Duration::from_secs(60),
                max_processing_age: max_age,
                page_size: 100,
            },
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn fresh_processing_jobs_are_left_alone() {
        let (ledger, _tmp) = setup();
        let job_id = seed_processing_job(&ledger);

        let swept = sweeper(&ledger, Duration::from_secs(180)).sweep_once().unwrap();
        assert_eq!(swept, 0);
        assert_eq!(
            ledger.get_job(&job_id).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn stale_processing_jobs_are_failed_with_timeout_message() {
        let (ledger, _tmp) = setup();
        let job_id = seed_processing_job(&ledger);

        // Zero max age: everything in processing is already stale.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let swept = sweeper(&ledger, Duration::ZERO).sweep_once().unwrap();
        assert_eq!(swept, 1);

        let job = ledger.get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.contains("timeout"));
        assert!(job.error.contains("maximum age"));
    }

    #[tokio::test]
    async fn completed_jobs_are_never_touched() {
        let (ledger, _tmp) = setup();
        let job_id = seed_processing_job(&ledger);
        ledger
            .update_status(&job_id, JobStatus::Completed, None)
            .unwrap();

        let swept = sweeper(&ledger, Duration::ZERO).sweep_once().unwrap();
        assert_eq!(swept, 0);
        assert_eq!(
            ledger.get_job(&job_id).unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn sweeps_multiple_pages() {
        let (ledger, _tmp) = setup();
        let mut job_ids = Vec::new();
        for _ in 0..5 {
            job_ids.push(seed_processing_job(&ledger));
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let mut sweeper = sweeper(&ledger, Duration::ZERO);
        sweeper.config.page_size = 2;
        let swept = sweeper.sweep_once().unwrap();
        assert_eq!(swept, 5);

        for job_id in job_ids {
            assert_eq!(
                ledger.get_job(&job_id).unwrap().unwrap().status,
                JobStatus::Failed
            );
        }
    }
}
