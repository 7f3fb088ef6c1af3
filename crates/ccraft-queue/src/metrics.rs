//! Queue metrics.
//!
//! - Jobs enqueued, deduplicated, completed, retried and failed per queue
//! - Pool acquisitions
//! - Open queue handles and cache size gauges

use metrics::{counter, gauge};

use crate::job::QueueName;

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "ccraft_jobs_enqueued_total";
    pub const JOBS_DEDUPLICATED_TOTAL: &str = "ccraft_jobs_deduplicated_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "ccraft_jobs_completed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "ccraft_jobs_retried_total";
    pub const JOBS_FAILED_TOTAL: &str = "ccraft_jobs_failed_total";
    pub const POOL_ACQUISITIONS_TOTAL: &str = "ccraft_pool_acquisitions_total";
    pub const OPEN_QUEUE_HANDLES: &str = "ccraft_open_queue_handles";
    pub const CACHE_ENTRIES: &str = "ccraft_job_cache_entries";
}

pub fn record_enqueued(queue: QueueName) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "queue" => queue.as_str()).increment(1);
}

pub fn record_deduplicated(queue: QueueName) {
    counter!(names::JOBS_DEDUPLICATED_TOTAL, "queue" => queue.as_str()).increment(1);
}

pub fn record_completed(queue: QueueName) {
    counter!(names::JOBS_COMPLETED_TOTAL, "queue" => queue.as_str()).increment(1);
}

pub fn record_retried(queue: QueueName) {
    counter!(names::JOBS_RETRIED_TOTAL, "queue" => queue.as_str()).increment(1);
}

pub fn record_failed(queue: QueueName) {
    counter!(names::JOBS_FAILED_TOTAL, "queue" => queue.as_str()).increment(1);
}

pub fn record_pool_acquire() {
    counter!(names::POOL_ACQUISITIONS_TOTAL).increment(1);
}

pub fn set_open_handles(count: usize) {
    gauge!(names::OPEN_QUEUE_HANDLES).set(count as f64);
}

pub fn set_cache_entries(count: usize) {
    gauge!(names::CACHE_ENTRIES).set(count as f64);
}
