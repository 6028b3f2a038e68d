use crate::classify::FailureKind;
use crate::metrics::snapshot::MetricsSnapshot;
use crate::normalize::ValidationFailure;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

/// Run-scoped counters shared by the pipeline, the retry scheduler and the
/// scraper. Cloning shares the same counters.
#[derive(Clone)]
pub struct MetricsCollector {
    items_extracted: Arc<AtomicU64>,
    processed: Arc<AtomicU64>,
    requests_total: Arc<AtomicU64>,
    requests_success: Arc<AtomicU64>,
    requests_failed: Arc<AtomicU64>,
    total_response_time_ms: Arc<AtomicU64>,
    pages: Arc<AtomicU64>,
    retries: Arc<AtomicU64>,
    validation_errors: Arc<Mutex<BTreeMap<ValidationFailure, u64>>>,
    errors_by_kind: Arc<Mutex<BTreeMap<FailureKind, u64>>>,
    start_time: Arc<Instant>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            items_extracted: Arc::new(AtomicU64::new(0)),
            processed: Arc::new(AtomicU64::new(0)),
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            total_response_time_ms: Arc::new(AtomicU64::new(0)),
            pages: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            validation_errors: Arc::new(Mutex::new(BTreeMap::new())),
            errors_by_kind: Arc::new(Mutex::new(BTreeMap::new())),
            start_time: Arc::new(Instant::now()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_items_extracted(&self) {
        self.items_extracted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_pages(&self) -> u64 {
        self.pages.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_validation(&self, failure: ValidationFailure) {
        let mut map = self
            .validation_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *map.entry(failure).or_insert(0) += 1;
    }

    pub fn record_error(&self, kind: FailureKind) {
        let mut map = self
            .errors_by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *map.entry(kind).or_insert(0) += 1;
    }

    pub fn record_success(&self, duration: Duration) {
        self.requests_total.fetch_add(1, Ordering::SeqCst);
        self.requests_success.fetch_add(1, Ordering::SeqCst);
        self.total_response_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.requests_total.fetch_add(1, Ordering::SeqCst);
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        self.total_response_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> u64 {
        self.pages.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.requests_total.load(Ordering::SeqCst);
        let success = self.requests_success.load(Ordering::SeqCst);
        let failed = self.requests_failed.load(Ordering::SeqCst);
        let total_time = self.total_response_time_ms.load(Ordering::SeqCst);

        let success_rate = if total_requests > 0 {
            (success as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        let avg_response_time_ms = if total_requests > 0 {
            total_time / total_requests
        } else {
            0
        };

        let validation_errors = self
            .validation_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(kind, count)| (kind.label().to_string(), *count))
            .collect();

        let errors_by_kind = self
            .errors_by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(kind, count)| (kind.label().to_string(), *count))
            .collect();

        let elapsed = self.start_time.elapsed().as_secs_f64();

        MetricsSnapshot {
            items_extracted: self.items_extracted.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            validation_errors,
            requests_total: total_requests,
            requests_success: success,
            requests_failed: failed,
            pages: self.pages.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            errors_by_kind,
            success_rate,
            avg_response_time_ms,
            requests_per_second: if elapsed > 0.0 {
                total_requests as f64 / elapsed
            } else {
                0.0
            },
            elapsed_seconds: elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();

        clone.increment_processed();
        clone.record_validation(ValidationFailure::DuplicateUrl);
        clone.record_validation(ValidationFailure::DuplicateUrl);
        clone.record_error(FailureKind::RateLimited);
        clone.increment_retries();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.validation_count("duplicate_url"), 2);
        assert_eq!(snapshot.validation_count("invalid_record"), 0);
        assert_eq!(snapshot.error_count("rate_limited"), 1);
        assert_eq!(snapshot.retries, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let metrics = MetricsCollector::new();
        metrics.record_validation(ValidationFailure::InvalidRecord);
        let before = metrics.snapshot();
        metrics.record_validation(ValidationFailure::InvalidRecord);

        assert_eq!(before.validation_count("invalid_record"), 1);
        assert_eq!(metrics.snapshot().validation_count("invalid_record"), 2);
    }

    #[test]
    fn test_request_rates() {
        let metrics = MetricsCollector::new();
        metrics.record_success(Duration::from_millis(30));
        metrics.record_failure(Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.avg_response_time_ms, 20);
        assert!((snapshot.success_rate - 50.0).abs() < f64::EPSILON);
    }
}
