use crate::config::DedupSettings;
use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::RequestFingerprint;
use crate::observability::get_metrics;
use crate::reliability::with_timeout;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What to do when the shared store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the request as new. Risks a duplicate side effect.
    FailOpen,
    /// Treat the request as a duplicate. Risks dropping it.
    FailClosed,
}

/// Marker written on first observation of a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub fingerprint: String,
    pub label: String,
    pub first_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DedupRecord {
    pub fn new(fingerprint: &RequestFingerprint, label: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            fingerprint: fingerprint.to_string(),
            label: label.to_string(),
            first_seen_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Result of a check-and-mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// First observation within the TTL window.
    Proceed,
    /// Already marked; the caller should short-circuit with a success response.
    Skip,
    /// Store failed and the policy is fail-open.
    ProceedDegraded,
    /// Store failed and the policy is fail-closed.
    SkipDegraded,
}

impl DedupDecision {
    pub fn should_proceed(&self) -> bool {
        matches!(self, DedupDecision::Proceed | DedupDecision::ProceedDegraded)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DedupDecision::ProceedDegraded | DedupDecision::SkipDegraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DedupDecision::Proceed => "new",
            DedupDecision::Skip => "duplicate",
            DedupDecision::ProceedDegraded => "fail_open",
            DedupDecision::SkipDegraded => "fail_closed",
        }
    }
}

/// Counters for dedup checks.
#[derive(Debug, Default)]
pub struct DedupMetrics {
    pub total_checks: AtomicU64,
    pub new_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub degraded_checks: AtomicU64,
}

impl DedupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, decision: DedupDecision) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        match decision {
            DedupDecision::Proceed => self.new_requests.fetch_add(1, Ordering::Relaxed),
            DedupDecision::Skip => self.duplicate_requests.fetch_add(1, Ordering::Relaxed),
            DedupDecision::ProceedDegraded | DedupDecision::SkipDegraded => {
                self.degraded_checks.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn snapshot(&self) -> DedupMetricsSnapshot {
        DedupMetricsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            degraded_checks: self.degraded_checks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupMetricsSnapshot {
    pub total_checks: u64,
    pub new_requests: u64,
    pub duplicate_requests: u64,
    pub degraded_checks: u64,
}

impl DedupMetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_checks as f64
        }
    }
}

/// Records "this fingerprint was already handled" in the shared store.
///
/// The check and the mark are one `SET NX EX` call, so of any number of
/// concurrent callers with the same fingerprint exactly one is told to
/// proceed. This is a latency fast path; the data layer still enforces
/// uniqueness on the business key.
pub struct DedupStore {
    store: Arc<dyn SharedStore>,
    key_prefix: String,
    default_ttl: Duration,
    default_policy: FailurePolicy,
    store_timeout: Duration,
    metrics: Arc<DedupMetrics>,
}

impl DedupStore {
    pub fn new(store: Arc<dyn SharedStore>, settings: &DedupSettings, store_timeout: Duration) -> Self {
        Self {
            store,
            key_prefix: settings.key_prefix.clone(),
            default_ttl: settings.default_ttl(),
            default_policy: settings.failure_policy,
            store_timeout,
            metrics: Arc::new(DedupMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<DedupMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn default_policy(&self) -> FailurePolicy {
        self.default_policy
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn key(&self, fingerprint: &RequestFingerprint) -> String {
        format!("{}:{}", self.key_prefix, fingerprint)
    }

    /// Returns true if this is the first time `fingerprint` is seen within the
    /// TTL window, false for a duplicate. Store failures follow the configured
    /// default policy. `ttl` falls back to the configured default.
    pub async fn check_and_mark_request(
        &self,
        fingerprint: &RequestFingerprint,
        label: &str,
        ttl: Option<Duration>,
    ) -> bool {
        self.check_and_mark_with_policy(fingerprint, label, ttl.unwrap_or(self.default_ttl), self.default_policy)
            .await
            .should_proceed()
    }

    /// Atomic check-and-set with an explicit failure policy for this call site.
    pub async fn check_and_mark_with_policy(
        &self,
        fingerprint: &RequestFingerprint,
        label: &str,
        ttl: Duration,
        policy: FailurePolicy,
    ) -> DedupDecision {
        let decision = match self.try_mark(fingerprint, label, ttl).await {
            Ok(true) => DedupDecision::Proceed,
            Ok(false) => {
                tracing::info!(label = %label, fingerprint = %fingerprint, "Duplicate request skipped");
                DedupDecision::Skip
            }
            Err(e) => self.degrade(fingerprint, label, policy, &e),
        };

        self.metrics.record(decision);
        get_metrics().record_dedup_check(label, decision.as_str());
        decision
    }

    async fn try_mark(&self, fingerprint: &RequestFingerprint, label: &str, ttl: Duration) -> Result<bool> {
        let record = DedupRecord::new(fingerprint, label, ttl);
        let value = serde_json::to_string(&record)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize dedup record: {}", e)))?;

        let store = Arc::clone(&self.store);
        let key = self.key(fingerprint);
        with_timeout(
            async move { store.set_if_absent(&key, &value, ttl).await },
            self.store_timeout,
            "dedup.set_if_absent",
        )
        .await
    }

    fn degrade(
        &self,
        fingerprint: &RequestFingerprint,
        label: &str,
        policy: FailurePolicy,
        error: &AppError,
    ) -> DedupDecision {
        match policy {
            FailurePolicy::FailOpen => {
                get_metrics().record_dedup_fail_open(label);
                tracing::warn!(
                    label = %label,
                    fingerprint = %fingerprint,
                    backend = self.store.backend(),
                    error = %error,
                    "Dedup store unavailable, failing open: request treated as new"
                );
                DedupDecision::ProceedDegraded
            }
            FailurePolicy::FailClosed => {
                get_metrics().record_dedup_fail_closed(label);
                tracing::warn!(
                    label = %label,
                    fingerprint = %fingerprint,
                    backend = self.store.backend(),
                    error = %error,
                    "Dedup store unavailable, failing closed: request treated as duplicate"
                );
                DedupDecision::SkipDegraded
            }
        }
    }

    /// Reads the record for `fingerprint`, if it is still live.
    pub async fn lookup(&self, fingerprint: &RequestFingerprint) -> Result<Option<DedupRecord>> {
        let Some(raw) = self.store.get(&self.key(fingerprint)).await? else {
            return Ok(None);
        };

        let record = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt dedup record: {}", e)))?;
        Ok(Some(record))
    }

    /// Clears the mark so a redelivery is processed again. Callers use this
    /// only when processing failed before its side effect was committed, or
    /// when the side effect is itself idempotent.
    pub async fn release(&self, fingerprint: &RequestFingerprint, label: &str) -> Result<bool> {
        let released = self.store.delete(&self.key(fingerprint)).await?;
        tracing::info!(label = %label, fingerprint = %fingerprint, released, "Dedup mark released");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{create_request_fingerprint, FingerprintFields};
    use crate::store::MemoryStore;

    fn dedup_store() -> DedupStore {
        DedupStore::new(
            Arc::new(MemoryStore::new()),
            &DedupSettings::default(),
            Duration::from_secs(1),
        )
    }

    fn fingerprint(quote: &str) -> RequestFingerprint {
        create_request_fingerprint(&FingerprintFields::new().with("quoteId", quote)).unwrap()
    }

    #[tokio::test]
    async fn test_first_call_proceeds_second_skips() {
        let dedup = dedup_store();
        let fp = fingerprint("Q1");

        assert!(dedup.check_and_mark_request(&fp, "test", None).await);
        assert!(!dedup.check_and_mark_request(&fp, "test", None).await);

        let snapshot = dedup.metrics().snapshot();
        assert_eq!(snapshot.total_checks, 2);
        assert_eq!(snapshot.new_requests, 1);
        assert_eq!(snapshot.duplicate_requests, 1);
        assert_eq!(snapshot.duplicate_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_lookup_returns_record() {
        let dedup = dedup_store();
        let fp = fingerprint("Q2");

        assert!(dedup.lookup(&fp).await.unwrap().is_none());
        dedup.check_and_mark_request(&fp, "webhook", None).await;

        let record = dedup.lookup(&fp).await.unwrap().unwrap();
        assert_eq!(record.fingerprint, fp.as_str());
        assert_eq!(record.label, "webhook");
        assert!(!record.is_expired());
        assert!(record.expires_at > record.first_seen_at);
    }

    #[tokio::test]
    async fn test_release_allows_reprocessing() {
        let dedup = dedup_store();
        let fp = fingerprint("Q3");

        assert!(dedup.check_and_mark_request(&fp, "test", None).await);
        assert!(dedup.release(&fp, "test").await.unwrap());
        assert!(dedup.check_and_mark_request(&fp, "test", None).await);
    }

    #[test]
    fn test_decision_flags() {
        assert!(DedupDecision::Proceed.should_proceed());
        assert!(DedupDecision::ProceedDegraded.should_proceed());
        assert!(!DedupDecision::Skip.should_proceed());
        assert!(!DedupDecision::SkipDegraded.should_proceed());
        assert!(DedupDecision::SkipDegraded.is_degraded());
        assert!(!DedupDecision::Skip.is_degraded());
    }

    #[test]
    fn test_failure_policy_serde() {
        let policy: FailurePolicy = serde_json::from_str("\"fail_closed\"").unwrap();
        assert_eq!(policy, FailurePolicy::FailClosed);
    }
}
