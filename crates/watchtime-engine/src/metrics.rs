//! Engine operation metrics.

use metrics::counter;

pub mod names {
    /// Engine operations by name and outcome
    /// (`committed`, `unchanged`, `rejected`, `error`).
    pub const OPERATIONS_TOTAL: &str = "watchtime_operations_total";

    /// Read operations that fell back to the default record.
    pub const READ_FALLBACKS_TOTAL: &str = "watchtime_read_fallbacks_total";
}

pub fn record_operation(operation: &'static str, outcome: &'static str) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_read_fallback() {
    counter!(names::READ_FALLBACKS_TOTAL).increment(1);
}
