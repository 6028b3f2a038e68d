use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single catalog entry extracted from a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub price: String,
    #[serde(rename = "rating")]
    pub rating_text: String,
    pub rating_numeric: u8,
    pub availability: String,
    pub image_url: String,
    /// Dedup key for the pipeline.
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

impl Book {
    pub fn new(
        title: impl Into<String>,
        price: impl Into<String>,
        rating_text: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            price: price.into(),
            rating_text: rating_text.into(),
            rating_numeric: 0,
            availability: String::new(),
            image_url: String::new(),
            url: url.into(),
            scraped_at: Utc::now(),
        }
    }

    pub fn with_availability(mut self, availability: impl Into<String>) -> Self {
        self.availability = availability.into();
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }
}

/// End-of-run summary produced by the scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_count: u64,
    pub error_count: u64,
    pub failed_urls: Vec<String>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub retry_count: u64,
    pub request_count: u64,
    pub page_count: u64,
}

impl ScrapeResult {
    pub fn elapsed(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Percentage of requests that did not end in an error.
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        let ok = self.request_count.saturating_sub(self.error_count);
        (ok as f64 / self.request_count as f64) * 100.0
    }
}
