//! Metrics module
//!
//! Prometheus counters and histograms for the upload backends, registered in
//! the default registry. Exposition is left to the embedding service via
//! [`gather`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "zero_common_uploads_total",
        "Total number of whole-file uploads",
        &["driver", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "zero_common_upload_bytes_total",
        "Total bytes uploaded, whole files and parts",
        &["driver"]
    ).unwrap();

    pub static ref PART_SIZE: HistogramVec = register_histogram_vec!(
        "zero_common_part_size_bytes",
        "Size of uploaded multipart parts",
        &["driver"],
        vec![65536.0, 1048576.0, 5242880.0, 16777216.0, 67108864.0, 268435456.0]
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_UPLOADS: CounterVec = register_counter_vec!(
        "zero_common_multipart_uploads_total",
        "Total multipart completions",
        &["driver", "status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "zero_common_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Maintenance operations (copy/delete/list)
    pub static ref STORAGE_OPERATIONS: CounterVec = register_counter_vec!(
        "zero_common_storage_operations_total",
        "Folder, listing and delete operations",
        &["driver", "operation", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "zero_common_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a successful whole-file upload
pub fn record_upload_success(driver: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[driver, "success"]).inc();
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[driver])
        .inc_by(bytes as f64);
}

/// Record a failed whole-file upload
pub fn record_upload_failure(driver: &str) {
    UPLOADS_TOTAL.with_label_values(&[driver, "failure"]).inc();
}

/// Record one stored multipart part
pub fn record_part(driver: &str, bytes: u64) {
    PART_SIZE.with_label_values(&[driver]).observe(bytes as f64);
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[driver])
        .inc_by(bytes as f64);
}

/// Record a successful multipart completion
pub fn record_multipart_success(driver: &str, parts_count: usize) {
    MULTIPART_UPLOADS
        .with_label_values(&[driver, "success"])
        .inc();
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record a failed multipart completion
pub fn record_multipart_failure(driver: &str) {
    MULTIPART_UPLOADS
        .with_label_values(&[driver, "failure"])
        .inc();
}

/// Record a copy, delete or listing operation
pub fn record_storage_operation(driver: &str, operation: &str, success: bool) {
    STORAGE_OPERATIONS
        .with_label_values(&[driver, operation, status(success)])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
