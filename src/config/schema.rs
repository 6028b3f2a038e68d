use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_settings", skip_on_field_errors = false))]
pub struct ScraperConfig {
    #[validate(length(min = 1))]
    pub base_url: String,

    #[validate(range(min = 1))]
    pub max_pages: u32,

    /// Concurrent fetches, and the number of pipeline workers.
    #[validate(range(min = 1))]
    pub parallelism: usize,

    pub delay_ms: u64,
    pub random_delay_ms: u64,

    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,

    #[validate(length(min = 1))]
    pub output_file: String,

    pub output_format: OutputFormat,

    #[validate(length(min = 1))]
    pub user_agent: String,

    pub respect_robots_txt: bool,

    #[validate(range(min = 1))]
    pub pipeline_buffer_size: usize,

    #[validate(range(min = 1))]
    pub batch_size: usize,

    #[validate(range(min = 1))]
    pub drain_timeout_ms: u64,

    /// Zero disables periodic pipeline progress logs.
    pub metrics_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Dual,
    Sqlite,
    Console,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Dual => "dual",
            OutputFormat::Sqlite => "sqlite",
            OutputFormat::Console => "console",
        };
        f.write_str(name)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://books.toscrape.com".to_string(),
            max_pages: 50,
            parallelism: 16,
            delay_ms: 0,
            random_delay_ms: 0,
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            retry_backoff_max_ms: 2_000,
            output_file: "output/books.csv".to_string(),
            output_format: OutputFormat::Csv,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            respect_robots_txt: false,
            pipeline_buffer_size: 512,
            batch_size: 64,
            drain_timeout_ms: 5_000,
            metrics_interval_ms: 10_000,
        }
    }
}

impl ScraperConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn random_delay(&self) -> Duration {
        Duration::from_millis(self.random_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::from(message));
    err
}

fn validate_settings(config: &ScraperConfig) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(&config.base_url)
        .map_err(|e| invalid("base_url", format!("invalid base URL: {}", e)))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid(
            "base_url",
            "base URL must include a host".to_string(),
        ));
    }

    if config.retry_backoff_max_ms > 0 && config.retry_backoff_ms > config.retry_backoff_max_ms {
        return Err(invalid(
            "retry_backoff",
            format!(
                "retry backoff ({}ms) cannot exceed retry backoff max ({}ms)",
                config.retry_backoff_ms, config.retry_backoff_max_ms
            ),
        ));
    }
    Ok(())
}
