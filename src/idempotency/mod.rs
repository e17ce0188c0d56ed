pub mod dedup;
pub mod fingerprint;

pub use dedup::{DedupDecision, DedupMetrics, DedupMetricsSnapshot, DedupRecord, DedupStore, FailurePolicy};
pub use fingerprint::{create_request_fingerprint, FieldValue, FingerprintFields, RequestFingerprint};
