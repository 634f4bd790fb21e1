/// Fjall-based persistence layer for uploads, jobs and evaluation results
///
/// This module is the durable core of the service. It uses fjall (an
/// embedded LSM key-value store) to persist:
///
/// - Uploads (ingested document text + metadata)
/// - Jobs (status, error, timestamps, upload references)
/// - Evaluation results (scores + feedback, 1:1 with completed jobs)
/// - Idempotency keys (deduplication for POST /v1/evaluate)
/// - Metadata (maintenance cursors)
///
/// ## Invariants enforced here
///
/// - Job status moves monotonically along
///   `queued -> processing -> {completed, failed}`; violations fail with
///   `Conflict`. Every accepted write advances `updated_at`.
/// - At most one job per idempotency key.
/// - Jobs reference existing uploads; retention never deletes an upload a
///   surviving job still points at.
/// - Result scores are range-checked at the storage boundary.
pub mod error;
pub mod models;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{LedgerError, Result};
pub use models::{Evaluation, Job, JobStatus, NewJob, NewUpload, Upload, UploadKind};
pub use pruning::PruneStats;
pub use store::{FjallLedger, StatusCounts};
