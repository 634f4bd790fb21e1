//! Observability hooks (process-scoped counters)
//!
//! Exporter wiring is out of scope; these counters are the hooks the rest
//! of the service increments.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    jobs_admitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_swept: AtomicU64,
    messages_retried: AtomicU64,
    messages_dead_lettered: AtomicU64,
    llm_calls: AtomicU64,
    embed_cache_hits: AtomicU64,
    embed_cache_misses: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_admitted(&self) {
        self.jobs_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_swept(&self) {
        self.jobs_swept.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn embed_cache_hit(&self) {
        self.embed_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn embed_cache_miss(&self) {
        self.embed_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_admitted: self.jobs_admitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_swept: self.jobs_swept.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            embed_cache_hits: self.embed_cache_hits.load(Ordering::Relaxed),
            embed_cache_misses: self.embed_cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_admitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_swept: u64,
    pub messages_retried: u64,
    pub messages_dead_lettered: u64,
    pub llm_calls: u64,
    pub embed_cache_hits: u64,
    pub embed_cache_misses: u64,
}
