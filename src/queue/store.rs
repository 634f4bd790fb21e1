use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use thiserror::Error;
use tracing::{debug, info};

use super::task::{DeadLetterTask, EvalTask};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: seq={0}")]
    TaskNotFound(u64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// FjallQueue persists evaluation tasks and the dead-letter queue
///
/// Architecture:
/// - `tasks` partition: u64 (big-endian) -> EvalTask (canonical JSON)
/// - `metadata` partition: "next_seq" -> u64 (atomic counter)
/// - `dlq` partition: u64 (big-endian) -> DeadLetterTask (canonical JSON)
///
/// A task is persisted before it is dispatched to a consumer and removed
/// only on acknowledgement, so delivery is at-least-once: anything still in
/// the `tasks` partition at startup is re-dispatched.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: AtomicU64,
}

impl FjallQueue {
    /// Open or create a queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            metadata,
            dlq,
            seq_counter: AtomicU64::new(current_seq),
        })
    }

    /// Persist a task and return its sequence number. The counter write is
    /// last so a crash mid-enqueue never loses an assigned sequence.
    pub fn enqueue(&self, task: &EvalTask) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let value = serde_json::to_vec(task)?;
        self.tasks.insert(seq.to_be_bytes(), value)?;
        self.metadata
            .insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, job_id = %task.job_id, "Task enqueued");
        Ok(seq)
    }

    pub fn get_task(&self, seq: u64) -> Result<Option<EvalTask>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a task: remove it from the pending partition.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.tasks.remove(seq.to_be_bytes())?;
        debug!(seq, "Task acknowledged");
        Ok(())
    }

    /// Move a task to the dead-letter partition after retry exhaustion.
    pub fn move_to_dlq(&self, seq: u64, failure_reason: String, attempts: u32) -> Result<()> {
        let task = self.get_task(seq)?.ok_or(QueueError::TaskNotFound(seq))?;

        let entry = DeadLetterTask {
            task,
            failure_reason,
            attempts,
            failed_at: Utc::now(),
        };
        self.dlq
            .insert(seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        self.tasks.remove(seq.to_be_bytes())?;

        info!(seq, attempts, "Task moved to DLQ");
        Ok(())
    }

    pub fn get_dlq_task(&self, seq: u64) -> Result<Option<DeadLetterTask>> {
        match self.dlq.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List DLQ tasks (for inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        let mut results = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            results.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    /// Remove DLQ entries older than `max_age`; returns how many went.
    pub fn purge_dlq_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(7));

        let mut expired = Vec::new();
        for item in self.dlq.iter() {
            let (key, value) = item?;
            let entry: DeadLetterTask = serde_json::from_slice(&value)?;
            if entry.failed_at < cutoff {
                expired.push(key.to_vec());
            }
        }

        let purged = expired.len();
        for key in expired {
            self.dlq.remove(key)?;
        }
        if purged > 0 {
            info!(purged, "Purged expired DLQ entries");
        }
        Ok(purged)
    }

    /// All unacknowledged tasks, in sequence order. Used for startup
    /// recovery after a crash.
    pub fn pending(&self) -> Result<Vec<(u64, EvalTask)>> {
        let mut results = Vec::new();
        for item in self.tasks.iter() {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            results.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_task(job_id: &str) -> EvalTask {
        EvalTask {
            job_id: job_id.to_string(),
            cv_id: "cv-1".to_string(),
            project_id: "p-1".to_string(),
            job_description: String::new(),
            study_case_brief: String::new(),
            scoring_rubric: String::new(),
            request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn enqueue_and_retrieve() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("job1")).unwrap();
        assert_eq!(seq, 0);

        let retrieved = queue.get_task(seq).unwrap().unwrap();
        assert_eq!(retrieved.job_id, "job1");
    }

    #[test]
    fn sequential_ids() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        assert_eq!(queue.enqueue(&create_test_task("job1")).unwrap(), 0);
        assert_eq!(queue.enqueue(&create_test_task("job2")).unwrap(), 1);
        assert_eq!(queue.enqueue(&create_test_task("job3")).unwrap(), 2);
    }

    #[test]
    fn ack_removes_from_pending() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("job1")).unwrap();
        assert_eq!(queue.pending().unwrap().len(), 1);

        queue.ack(seq).unwrap();
        assert!(queue.get_task(seq).unwrap().is_none());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn move_to_dlq_records_failure() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("failed_job")).unwrap();
        queue
            .move_to_dlq(seq, "rate limit not cleared".to_string(), 3)
            .unwrap();

        let entry = queue.get_dlq_task(seq).unwrap().unwrap();
        assert_eq!(entry.failure_reason, "rate limit not cleared");
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.task.job_id, "failed_job");

        // Removed from the main partition.
        assert!(queue.get_task(seq).unwrap().is_none());
        assert_eq!(queue.list_dlq(10).unwrap().len(), 1);
    }

    #[test]
    fn dlq_purge_honours_age() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path()).unwrap();

        let seq = queue.enqueue(&create_test_task("job1")).unwrap();
        queue.move_to_dlq(seq, "boom".to_string(), 2).unwrap();

        // Fresh entry survives a generous window.
        assert_eq!(
            queue
                .purge_dlq_older_than(Duration::from_secs(3600))
                .unwrap(),
            0
        );
        // Zero window purges it.
        assert_eq!(queue.purge_dlq_older_than(Duration::ZERO).unwrap(), 1);
        assert!(queue.get_dlq_task(seq).unwrap().is_none());
    }

    #[test]
    fn persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();

        let seq = {
            let queue = FjallQueue::open(temp_dir.path()).unwrap();
            queue.enqueue(&create_test_task("job1")).unwrap()
        };

        let queue = FjallQueue::open(temp_dir.path()).unwrap();
        assert_eq!(queue.current_seq(), 1);
        assert_eq!(queue.pending().unwrap().len(), 1);

        let old_task = queue.get_task(seq).unwrap().unwrap();
        assert_eq!(old_task.job_id, "job1");
    }
}
