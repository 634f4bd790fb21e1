/// Retention policy implementation
///
/// Deletes records older than the configured window, results before jobs
/// before uploads so referential integrity holds at every step. Uploads
/// still referenced by a surviving job are kept (restrict-on-delete).
use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use fjall::{Keyspace, PartitionHandle};
use tracing::debug;

use super::error::Result;
use super::models::{Job, Upload};
use super::partitions::{JOB_PREFIX, UPLOAD_PREFIX, encode_idem_key, encode_result_key};

/// Pruning statistics
#[derive(Debug, Default)]
pub struct PruneStats {
    pub jobs_pruned: usize,
    pub results_pruned: usize,
    pub uploads_pruned: usize,
    pub idempotency_pruned: usize,
}

pub(super) fn prune_expired(
    keyspace: &Keyspace,
    uploads: &PartitionHandle,
    jobs: &PartitionHandle,
    results: &PartitionHandle,
    idempotency: &PartitionHandle,
    retention: Duration,
) -> Result<PruneStats> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(90));
    let mut stats = PruneStats::default();

    // Pass 1: expired jobs with their results and idempotency keys.
    let mut expired = Vec::new();
    for item in jobs.prefix(JOB_PREFIX) {
        let (key, value) = item?;
        let job: Job = serde_json::from_slice(&value)?;
        if job.created_at < cutoff {
            expired.push((key.to_vec(), job));
        }
    }

    for (key, job) in expired {
        if results.get(encode_result_key(&job.id))?.is_some() {
            results.remove(encode_result_key(&job.id))?;
            stats.results_pruned += 1;
        }
        if let Some(idem) = &job.idempotency_key {
            if idempotency.get(encode_idem_key(idem))?.is_some() {
                idempotency.remove(encode_idem_key(idem))?;
                stats.idempotency_pruned += 1;
            }
        }
        jobs.remove(key)?;
        stats.jobs_pruned += 1;
        debug!(job_id = %job.id, "Pruned expired job");
    }

    // Pass 2: expired uploads not referenced by any surviving job.
    let mut referenced: HashSet<String> = HashSet::new();
    for item in jobs.prefix(JOB_PREFIX) {
        let (_, value) = item?;
        let job: Job = serde_json::from_slice(&value)?;
        referenced.insert(job.cv_id);
        referenced.insert(job.project_id);
    }

    let mut expired_uploads = Vec::new();
    for item in uploads.prefix(UPLOAD_PREFIX) {
        let (key, value) = item?;
        let upload: Upload = serde_json::from_slice(&value)?;
        if upload.created_at < cutoff && !referenced.contains(&upload.id) {
            expired_uploads.push(key.to_vec());
        }
    }
    for key in expired_uploads {
        uploads.remove(key)?;
        stats.uploads_pruned += 1;
    }

    keyspace.persist(fjall::PersistMode::SyncAll)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{Evaluation, JobStatus, UploadKind};
    use crate::ledger::partitions::{encode_job_key, encode_upload_key};
    use fjall::PartitionCreateOptions;
    use tempfile::TempDir;

    struct Raw {
        keyspace: Keyspace,
        uploads: PartitionHandle,
        jobs: PartitionHandle,
        results: PartitionHandle,
        idempotency: PartitionHandle,
        _tmp: TempDir,
    }

    fn raw() -> Raw {
        let tmp = TempDir::new().unwrap();
        let keyspace = fjall::Config::new(tmp.path().join("ledger")).open().unwrap();
        let uploads = keyspace
            .open_partition("uploads", PartitionCreateOptions::default())
            .unwrap();
        let jobs = keyspace
            .open_partition("jobs", PartitionCreateOptions::default())
            .unwrap();
        let results = keyspace
            .open_partition("results", PartitionCreateOptions::default())
            .unwrap();
        let idempotency = keyspace
            .open_partition("idempotency", PartitionCreateOptions::default())
            .unwrap();
        Raw {
            keyspace,
            uploads,
            jobs,
            results,
            idempotency,
            _tmp: tmp,
        }
    }

    fn put_upload(raw: &Raw, id: &str, age_days: i64) {
        let upload = Upload {
            id: id.into(),
            kind: UploadKind::Cv,
            text: "text".into(),
            filename: "f.txt".into(),
            mime: "text/plain".into(),
            size: 4,
            created_at: Utc::now() - chrono::Duration::days(age_days),
        };
        raw.uploads
            .insert(encode_upload_key(id), serde_json::to_vec(&upload).unwrap())
            .unwrap();
    }

    fn put_job(raw: &Raw, id: &str, cv: &str, project: &str, age_days: i64, idem: Option<&str>) {
        let created = Utc::now() - chrono::Duration::days(age_days);
        let job = Job {
            id: id.into(),
            status: JobStatus::Completed,
            error: String::new(),
            created_at: created,
            updated_at: created,
            cv_id: cv.into(),
            project_id: project.into(),
            idempotency_key: idem.map(String::from),
        };
        raw.jobs
            .insert(encode_job_key(id), serde_json::to_vec(&job).unwrap())
            .unwrap();
        if let Some(key) = idem {
            raw.idempotency
                .insert(encode_idem_key(key), id.as_bytes())
                .unwrap();
        }
    }

    fn put_result(raw: &Raw, job_id: &str) {
        let eval = Evaluation {
            job_id: job_id.into(),
            cv_match_rate: 0.5,
            cv_feedback: "Fine.".into(),
            project_score: 5.0,
            project_feedback: "Fine.".into(),
            overall_summary: "Fine. Adequate. Acceptable.".into(),
            created_at: Utc::now(),
        };
        raw.results
            .insert(encode_result_key(job_id), serde_json::to_vec(&eval).unwrap())
            .unwrap();
    }

    fn run(raw: &Raw, retention_days: u64) -> PruneStats {
        prune_expired(
            &raw.keyspace,
            &raw.uploads,
            &raw.jobs,
            &raw.results,
            &raw.idempotency,
            Duration::from_secs(retention_days * 86400),
        )
        .unwrap()
    }

    #[test]
    fn recent_records_are_kept() {
        let raw = raw();
        put_upload(&raw, "cv1", 1);
        put_upload(&raw, "p1", 1);
        put_job(&raw, "job1", "cv1", "p1", 1, Some("k1"));
        put_result(&raw, "job1");

        let stats = run(&raw, 90);
        assert_eq!(stats.jobs_pruned, 0);
        assert_eq!(stats.results_pruned, 0);
        assert_eq!(stats.uploads_pruned, 0);
        assert!(raw.jobs.get(encode_job_key("job1")).unwrap().is_some());
    }

    #[test]
    fn expired_job_takes_result_and_idempotency_with_it() {
        let raw = raw();
        put_upload(&raw, "cv1", 120);
        put_upload(&raw, "p1", 120);
        put_job(&raw, "job1", "cv1", "p1", 120, Some("k1"));
        put_result(&raw, "job1");

        let stats = run(&raw, 90);
        assert_eq!(stats.jobs_pruned, 1);
        assert_eq!(stats.results_pruned, 1);
        assert_eq!(stats.idempotency_pruned, 1);
        assert_eq!(stats.uploads_pruned, 2);
        assert!(raw.jobs.get(encode_job_key("job1")).unwrap().is_none());
        assert!(raw.results.get(encode_result_key("job1")).unwrap().is_none());
        assert!(raw.idempotency.get(encode_idem_key("k1")).unwrap().is_none());
    }

    #[test]
    fn old_upload_referenced_by_live_job_survives() {
        let raw = raw();
        // Uploads well past retention, but the job referencing them is recent.
        put_upload(&raw, "cv1", 120);
        put_upload(&raw, "p1", 120);
        put_job(&raw, "job1", "cv1", "p1", 1, None);

        let stats = run(&raw, 90);
        assert_eq!(stats.jobs_pruned, 0);
        assert_eq!(stats.uploads_pruned, 0);
        assert!(raw.uploads.get(encode_upload_key("cv1")).unwrap().is_some());
    }

    #[test]
    fn orphan_expired_upload_is_removed() {
        let raw = raw();
        put_upload(&raw, "orphan", 120);
        put_upload(&raw, "recent", 1);

        let stats = run(&raw, 90);
        assert_eq!(stats.uploads_pruned, 1);
        assert!(raw.uploads.get(encode_upload_key("orphan")).unwrap().is_none());
        assert!(raw.uploads.get(encode_upload_key("recent")).unwrap().is_some());
    }
}
