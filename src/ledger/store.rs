use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::models::{Evaluation, Job, JobStatus, NewJob, NewUpload, Upload, UploadKind};
use super::partitions::{
    JOB_PREFIX, UPLOAD_PREFIX, encode_idem_key, encode_job_key, encode_result_key,
    encode_upload_key,
};
use super::pruning::{self, PruneStats};

/// Fjall-backed persistent storage for uploads, jobs, evaluation results and
/// idempotency mappings
///
/// The ledger is the single source of truth for job state. Conditional
/// status transitions are serialised behind `write_lock` so that a
/// read-check-write sequence is atomic; fjall itself has no multi-key
/// transactions.
pub struct FjallLedger {
    keyspace: Keyspace,
    uploads: PartitionHandle,
    jobs: PartitionHandle,
    results: PartitionHandle,
    idempotency: PartitionHandle,
    metadata: PartitionHandle,
    write_lock: Mutex<()>,
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl FjallLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let uploads = keyspace.open_partition("uploads", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let results = keyspace.open_partition("results", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            uploads,
            jobs,
            results,
            idempotency,
            metadata,
            write_lock: Mutex::new(()),
        })
    }

    // ---- uploads ----

    /// Persist an ingested document; the ledger assigns the id and timestamp.
    pub fn create_upload(&self, new: NewUpload) -> Result<Upload> {
        let upload = Upload {
            id: Uuid::now_v7().to_string(),
            kind: new.kind,
            text: new.text,
            filename: new.filename,
            mime: new.mime,
            size: new.size,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&upload)?;
        self.uploads.insert(encode_upload_key(&upload.id), value)?;
        debug!(upload_id = %upload.id, kind = upload.kind.as_str(), "Upload stored");
        Ok(upload)
    }

    pub fn get_upload(&self, id: &str) -> Result<Option<Upload>> {
        match self.uploads.get(encode_upload_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn count_uploads(&self) -> Result<u64> {
        let mut count = 0;
        for item in self.uploads.prefix(UPLOAD_PREFIX) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn count_uploads_by_kind(&self, kind: UploadKind) -> Result<u64> {
        let mut count = 0;
        for item in self.uploads.prefix(UPLOAD_PREFIX) {
            let (_, value) = item?;
            let upload: Upload = serde_json::from_slice(&value)?;
            if upload.kind == kind {
                count += 1;
            }
        }
        Ok(count)
    }

    // ---- jobs ----

    /// Create a job in `queued`. Rejects with `Conflict` when the
    /// idempotency key already maps to a job, and with `InvalidArgument`
    /// when either upload reference does not exist.
    pub fn create_job(&self, new: NewJob) -> Result<Job> {
        let _guard = self.write_lock.lock().expect("ledger lock poisoned");

        if self.get_upload(&new.cv_id)?.is_none() {
            return Err(LedgerError::InvalidArgument(format!(
                "cv upload {} not found",
                new.cv_id
            )));
        }
        if self.get_upload(&new.project_id)?.is_none() {
            return Err(LedgerError::InvalidArgument(format!(
                "project upload {} not found",
                new.project_id
            )));
        }

        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = self.idempotency.get(encode_idem_key(key))? {
                let job_id = String::from_utf8_lossy(&existing).to_string();
                return Err(LedgerError::Conflict(format!(
                    "idempotency key already maps to job {job_id}"
                )));
            }
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::now_v7().to_string(),
            status: JobStatus::Queued,
            error: String::new(),
            created_at: now,
            updated_at: now,
            cv_id: new.cv_id,
            project_id: new.project_id,
            idempotency_key: new.idempotency_key,
        };

        self.jobs
            .insert(encode_job_key(&job.id), serde_json::to_vec(&job)?)?;
        if let Some(key) = &job.idempotency_key {
            self.idempotency
                .insert(encode_idem_key(key), job.id.as_bytes())?;
        }

        debug!(job_id = %job.id, "Job created");
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>> {
        match self.idempotency.get(encode_idem_key(key))? {
            Some(value) => {
                let job_id = String::from_utf8_lossy(&value).to_string();
                self.get_job(&job_id)
            }
            None => Ok(None),
        }
    }

    /// Atomically transition a job's status. `error` is persisted only when
    /// `next == Failed`. Violations of the transition closure fail with
    /// `Conflict`; every accepted write advances `updated_at`.
    pub fn update_status(&self, id: &str, next: JobStatus, error: Option<&str>) -> Result<Job> {
        let _guard = self.write_lock.lock().expect("ledger lock poisoned");

        let mut job = self
            .get_job(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("job {id}")))?;

        if !job.status.can_transition_to(next) {
            return Err(LedgerError::Conflict(format!(
                "job {id} cannot move {} -> {}",
                job.status, next
            )));
        }

        job.status = next;
        job.error = match next {
            JobStatus::Failed => error.unwrap_or_default().to_string(),
            _ => String::new(),
        };
        job.updated_at = Utc::now();

        self.jobs
            .insert(encode_job_key(&job.id), serde_json::to_vec(&job)?)?;
        debug!(job_id = %job.id, status = %job.status, "Job status updated");
        Ok(job)
    }

    /// List jobs matching the filters, newest first.
    pub fn list_jobs(
        &self,
        offset: usize,
        limit: usize,
        search: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let mut jobs = self.collect_jobs(search, status)?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    pub fn count_jobs_with_filters(
        &self,
        search: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<u64> {
        Ok(self.collect_jobs(search, status)?.len() as u64)
    }

    pub fn count_jobs(&self) -> Result<u64> {
        let mut count = 0;
        for item in self.jobs.prefix(JOB_PREFIX) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn count_jobs_by_status(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for item in self.jobs.prefix(JOB_PREFIX) {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Mean wall-clock duration from creation to completion across all
    /// completed jobs; `None` when no job has completed yet.
    pub fn average_processing_time(&self) -> Result<Option<std::time::Duration>> {
        let mut total_secs: i64 = 0;
        let mut completed: u32 = 0;
        for item in self.jobs.prefix(JOB_PREFIX) {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if job.status == JobStatus::Completed {
                total_secs += (job.updated_at - job.created_at).num_seconds().max(0);
                completed += 1;
            }
        }
        if completed == 0 {
            return Ok(None);
        }
        Ok(Some(std::time::Duration::from_secs(
            (total_secs as u64) / u64::from(completed),
        )))
    }

    fn collect_jobs(&self, search: Option<&str>, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for item in self.jobs.prefix(JOB_PREFIX) {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if let Some(wanted) = status {
                if job.status != wanted {
                    continue;
                }
            }
            if let Some(needle) = search {
                if !needle.is_empty()
                    && !job.id.contains(needle)
                    && !job.cv_id.contains(needle)
                    && !job.project_id.contains(needle)
                {
                    continue;
                }
            }
            jobs.push(job);
        }
        Ok(jobs)
    }

    // ---- results ----

    /// Upsert the evaluation for a job. Numeric fields are validated to
    /// their ranges; out-of-range writes fail with `InvalidArgument`.
    pub fn upsert_result(&self, evaluation: &Evaluation) -> Result<()> {
        evaluation
            .validate_ranges()
            .map_err(LedgerError::InvalidArgument)?;

        if self.get_job(&evaluation.job_id)?.is_none() {
            return Err(LedgerError::NotFound(format!(
                "job {}",
                evaluation.job_id
            )));
        }

        self.results.insert(
            encode_result_key(&evaluation.job_id),
            serde_json::to_vec(evaluation)?,
        )?;
        debug!(job_id = %evaluation.job_id, "Evaluation stored");
        Ok(())
    }

    pub fn get_result(&self, job_id: &str) -> Result<Option<Evaluation>> {
        match self.results.get(encode_result_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Remove a stored result. Used when a worker loses the completion race
    /// (the sweeper failed the job first) after the result was written, so
    /// the result-iff-completed invariant holds.
    pub fn delete_result(&self, job_id: &str) -> Result<()> {
        self.results.remove(encode_result_key(job_id))?;
        Ok(())
    }

    // ---- maintenance ----

    /// Delete records older than the retention window; results before jobs
    /// before uploads, and uploads still referenced by a live job are kept.
    pub fn prune_expired(&self, retention: std::time::Duration) -> Result<PruneStats> {
        let _guard = self.write_lock.lock().expect("ledger lock poisoned");
        let stats = pruning::prune_expired(
            &self.keyspace,
            &self.uploads,
            &self.jobs,
            &self.results,
            &self.idempotency,
            retention,
        )?;
        info!(?stats, "Retention pruning completed");
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"meta:health")?;
        Ok(())
    }
}
