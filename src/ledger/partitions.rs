/// Key layout and encoding utilities for ledger partitions
///
/// Partition structure:
/// - `uploads`: upload:{id} -> Upload (JSON)
/// - `jobs`: job:{id} -> Job (JSON)
/// - `results`: result:{job_id} -> Evaluation (JSON)
/// - `idempotency`: idem:{key} -> job_id (string)
/// - `metadata`: meta:{key} -> value (string)

pub const UPLOAD_PREFIX: &str = "upload:";
pub const JOB_PREFIX: &str = "job:";
pub const RESULT_PREFIX: &str = "result:";
pub const IDEM_PREFIX: &str = "idem:";
pub const META_PREFIX: &str = "meta:";

/// Encode an upload key: upload:{id}
pub fn encode_upload_key(id: &str) -> Vec<u8> {
    format!("{UPLOAD_PREFIX}{id}").into_bytes()
}

/// Encode a job key: job:{id}
pub fn encode_job_key(id: &str) -> Vec<u8> {
    format!("{JOB_PREFIX}{id}").into_bytes()
}

/// Decode a job key: job:{id} -> id
pub fn decode_job_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix(JOB_PREFIX).map(String::from)
}

/// Decode an upload key: upload:{id} -> id
pub fn decode_upload_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix(UPLOAD_PREFIX).map(String::from)
}

/// Encode a result key: result:{job_id}
pub fn encode_result_key(job_id: &str) -> Vec<u8> {
    format!("{RESULT_PREFIX}{job_id}").into_bytes()
}

/// Encode an idempotency key: idem:{key}
pub fn encode_idem_key(key: &str) -> Vec<u8> {
    format!("{IDEM_PREFIX}{key}").into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("{META_PREFIX}{key}").into_bytes()
}
