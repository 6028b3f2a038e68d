pub mod classify;
pub mod config;
pub mod crawler;
mod dedup;
pub mod error;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod spider;

pub use classify::{classify, FailureKind, FetchFailure};
pub use config::{ConfigLoader, OutputFormat, Overrides, ScraperConfig};
pub use crawler::{CrawlerState, Scraper};
pub use error::{Error, Result};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use model::{Book, ScrapeResult};
pub use output::OutputSink;
pub use pipeline::{Pipeline, PipelineError, PipelineOptions};
pub use retry::{RetryPolicy, RetryScheduler};
