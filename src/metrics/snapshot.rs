use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub items_extracted: u64,
    pub processed: u64,
    pub validation_errors: BTreeMap<String, u64>,
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub pages: u64,
    pub retries: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub requests_per_second: f64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    pub fn validation_errors_total(&self) -> u64 {
        self.validation_errors.values().sum()
    }

    pub fn validation_count(&self, kind: &str) -> u64 {
        self.validation_errors.get(kind).copied().unwrap_or(0)
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors_by_kind.get(kind).copied().unwrap_or(0)
    }
}
