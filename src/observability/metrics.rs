use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the reliability layer.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_dedup_check(&self, label: &str, outcome: &str) {
        counter!("dedup_checks_total", "label" => label.to_string(), "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_dedup_fail_open(&self, label: &str) {
        counter!("dedup_fail_open_total", "label" => label.to_string()).increment(1);
    }

    pub fn record_dedup_fail_closed(&self, label: &str) {
        counter!("dedup_fail_closed_total", "label" => label.to_string()).increment(1);
    }

    pub fn record_cache_lookup(&self, hit: bool, duration_ms: f64) {
        let outcome = if hit { "hit" } else { "miss" };
        counter!("cache_requests_total", "outcome" => outcome).increment(1);
        histogram!("cache_lookup_duration_ms", "outcome" => outcome).record(duration_ms);
    }

    pub fn record_cache_error(&self, operation: &str) {
        counter!("cache_errors_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_cache_invalidation(&self) {
        counter!("cache_invalidations_total").increment(1);
    }

    pub fn record_retry_attempt(&self, label: &str) {
        counter!("retry_attempts_total", "label" => label.to_string()).increment(1);
    }

    pub fn record_retry_outcome(&self, label: &str, outcome: &str, attempts: u32) {
        counter!("retry_outcomes_total", "label" => label.to_string(), "outcome" => outcome.to_string()).increment(1);
        histogram!("retry_attempts_per_call", "label" => label.to_string()).record(attempts as f64);
    }

    pub fn record_timeout(&self, label: &str) {
        counter!("timeouts_total", "label" => label.to_string()).increment(1);
    }

    pub fn record_dead_letter(&self, task: &str) {
        counter!("dead_letters_total", "task" => task.to_string()).increment(1);
    }

    pub fn record_order_upsert(&self, created: bool, duration_ms: f64) {
        counter!("orders_upserted_total", "created" => created.to_string()).increment(1);
        histogram!("order_write_duration_ms").record(duration_ms);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }

    pub fn record_db_query(&self, query_type: &str, duration_ms: f64, success: bool) {
        counter!("db_queries_total", "type" => query_type.to_string(), "success" => success.to_string()).increment(1);
        histogram!("db_query_duration_ms", "type" => query_type.to_string()).record(duration_ms);
    }

    pub fn record_upstream_request(&self, service: &str, operation: &str, duration_ms: f64, success: bool) {
        counter!("upstream_requests_total", "service" => service.to_string(), "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("upstream_request_duration_ms", "service" => service.to_string()).record(duration_ms);
    }

    pub fn record_store_operation(&self, backend: &str, operation: &str, duration_ms: f64, success: bool) {
        counter!("store_operations_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("store_operation_duration_ms", "backend" => backend.to_string(), "operation" => operation.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("dedup_checks_total", Unit::Count, "Deduplication checks by outcome");
    describe_counter!("dedup_fail_open_total", Unit::Count, "Dedup checks that proceeded because the shared store failed");
    describe_counter!("dedup_fail_closed_total", Unit::Count, "Dedup checks that skipped because the shared store failed");

    describe_counter!("cache_requests_total", Unit::Count, "Cache lookups by outcome");
    describe_histogram!("cache_lookup_duration_ms", Unit::Milliseconds, "Cache lookup latency in milliseconds");
    describe_counter!("cache_errors_total", Unit::Count, "Shared store errors seen by the cache");
    describe_counter!("cache_invalidations_total", Unit::Count, "Explicit cache invalidations");

    describe_counter!("retry_attempts_total", Unit::Count, "Attempts made under a retry policy");
    describe_counter!("retry_outcomes_total", Unit::Count, "Terminal retry outcomes");
    describe_histogram!("retry_attempts_per_call", Unit::Count, "Attempts used per retried call");

    describe_counter!("timeouts_total", Unit::Count, "Operations that exceeded their time budget");
    describe_counter!("dead_letters_total", Unit::Count, "Detached tasks that failed");

    describe_counter!("orders_upserted_total", Unit::Count, "Order upserts keyed on quote id");
    describe_histogram!("order_write_duration_ms", Unit::Milliseconds, "Order write latency in milliseconds");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");

    describe_counter!("db_queries_total", Unit::Count, "Total database queries");
    describe_histogram!("db_query_duration_ms", Unit::Milliseconds, "Database query latency in milliseconds");

    describe_counter!("upstream_requests_total", Unit::Count, "Calls to third-party APIs");
    describe_histogram!("upstream_request_duration_ms", Unit::Milliseconds, "Third-party API latency in milliseconds");

    describe_counter!("store_operations_total", Unit::Count, "Total shared store operations");
    describe_histogram!("store_operation_duration_ms", Unit::Milliseconds, "Shared store operation latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
