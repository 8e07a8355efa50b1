//! Firestore request metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub const REQUESTS_TOTAL: &str = "watchtime_firestore_requests_total";
pub const REQUEST_SECONDS: &str = "watchtime_firestore_request_seconds";
pub const RETRIES_TOTAL: &str = "watchtime_firestore_retries_total";
/// Optimistic updates that lost the `updateTime` race and re-read.
pub const CONFLICTS_TOTAL: &str = "watchtime_firestore_conflicts_total";

pub fn record_request(operation: &'static str, status: u16, elapsed: Duration) {
    counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status.to_string()).increment(1);
    histogram!(REQUEST_SECONDS, "operation" => operation).record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_conflict(collection: &'static str) {
    counter!(CONFLICTS_TOTAL, "collection" => collection).increment(1);
}
