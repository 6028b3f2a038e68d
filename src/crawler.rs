use crate::classify::FetchFailure;
use crate::config::ScraperConfig;
use crate::error::{Error, Result};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::model::ScrapeResult;
use crate::pipeline::{Pipeline, PipelineError};
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::spider::{BookSpider, Page, Robots};
use chrono::Utc;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct Fetched {
    url: String,
    outcome: std::result::Result<Option<String>, FetchFailure>,
}

#[derive(Default)]
struct Tally {
    request_count: u64,
    error_count: u64,
    failed_urls: Vec<String>,
    errors_by_kind: BTreeMap<String, u64>,
}

/// Walks the paginated catalog, feeding extracted books into a [`Pipeline`]
/// and handing failed pages to the retry scheduler.
pub struct Scraper {
    config: ScraperConfig,
    base_url: Url,
    spider: Arc<BookSpider>,
    metrics: MetricsCollector,
    state: watch::Sender<CrawlerState>,
}

impl Scraper {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.host_str().map_or(true, str::is_empty) {
            return Err(Error::Config(format!(
                "base URL must include a host: {}",
                config.base_url
            )));
        }

        let spider = BookSpider::new(&config)?;
        let (state, _) = watch::channel(CrawlerState::Idle);

        Ok(Self {
            config,
            base_url,
            spider: Arc::new(spider),
            metrics: MetricsCollector::new(),
            state,
        })
    }

    /// Shares `metrics` with the pipeline and the retry scheduler.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn state(&self) -> CrawlerState {
        *self.state.borrow()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        let (tx, rx) = watch::channel(self.metrics.snapshot());
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Crawls from the base URL until the frontier is exhausted, no retry is
    /// armed and no fetch is in flight, or until `cancel` fires. In-flight
    /// fetches always finish; nothing new starts after cancellation.
    pub async fn run(&self, cancel: CancellationToken, pipeline: &Pipeline) -> Result<ScrapeResult> {
        let start_time = Utc::now();
        self.set_state(CrawlerState::Running);

        let robots = if self.config.respect_robots_txt {
            Some(self.spider.fetch_robots(&self.base_url).await)
        } else {
            None
        };

        let (frontier_tx, mut frontier_rx) = mpsc::unbounded_channel::<String>();
        let retry = RetryScheduler::new(
            RetryPolicy::from(&self.config),
            frontier_tx.clone(),
            self.metrics.clone(),
            cancel.clone(),
        );

        let mut visited = HashSet::new();
        let seed = self.base_url.to_string();
        visited.insert(seed.clone());
        frontier_tx
            .send(seed)
            .map_err(|e| Error::Internal(format!("frontier closed: {}", e)))?;

        let parallelism = self.config.parallelism.max(1);
        let mut tasks: JoinSet<Fetched> = JoinSet::new();
        let mut tally = Tally::default();
        let mut cancelled = cancel.is_cancelled();

        log::info!(
            "Starting crawl of {} (max_pages={}, parallelism={})",
            self.base_url,
            self.config.max_pages,
            parallelism
        );

        loop {
            while !cancelled && tasks.len() < parallelism {
                match frontier_rx.try_recv() {
                    Ok(url) => self.dispatch(&mut tasks, url, pipeline, robots.as_ref(), &mut tally),
                    Err(_) => break,
                }
            }

            if tasks.is_empty() {
                if cancelled {
                    break;
                }
                // armed retries are checked before the frontier; a timer that
                // fired in between has already pushed its target
                if retry.pending() == 0 {
                    match frontier_rx.try_recv() {
                        Ok(url) => {
                            self.dispatch(&mut tasks, url, pipeline, robots.as_ref(), &mut tally);
                            continue;
                        }
                        Err(_) => break,
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    log::info!("Shutting down, waiting for {} in-flight requests", tasks.len());
                    cancelled = true;
                    self.set_state(CrawlerState::Stopping);
                    retry.stop();
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(fetched) => self.settle(
                        fetched,
                        &retry,
                        &frontier_tx,
                        &mut visited,
                        &mut tally,
                        cancelled || cancel.is_cancelled(),
                    ),
                    Err(e) => log::error!("fetch task failed: {}", e),
                },
                Some(url) = frontier_rx.recv(), if !cancelled && tasks.len() < parallelism => {
                    self.dispatch(&mut tasks, url, pipeline, robots.as_ref(), &mut tally);
                }
                else => break,
            }
        }

        retry.stop();
        self.set_state(CrawlerState::Stopped);

        let result = ScrapeResult {
            start_time,
            end_time: Utc::now(),
            total_count: self.metrics.processed(),
            error_count: tally.error_count,
            failed_urls: tally.failed_urls,
            errors_by_kind: tally.errors_by_kind,
            retry_count: retry.total_retries(),
            request_count: tally.request_count,
            page_count: self.metrics.pages(),
        };
        log::info!(
            "Crawl finished: {} requests, {} errors, {} retries",
            result.request_count,
            result.error_count,
            result.retry_count
        );
        Ok(result)
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<Fetched>,
        url: String,
        pipeline: &Pipeline,
        robots: Option<&Robots>,
        tally: &mut Tally,
    ) {
        if let Some(robots) = robots {
            if !robots.allows(&url) {
                log::info!("Skipping {} (disallowed by robots.txt)", url);
                return;
            }
        }

        tally.request_count += 1;
        let delay = self.politeness_delay();
        let spider = self.spider.clone();
        let metrics = self.metrics.clone();
        let pipeline = pipeline.clone();

        tasks.spawn(async move {
            let started = Instant::now();
            let result = spider.scrape(&url).await;
            let duration = started.elapsed();

            let outcome = match result {
                Ok(Page { books, next }) => {
                    metrics.record_success(duration);
                    log::debug!("Extracted {} books from {}", books.len(), url);
                    for book in books {
                        metrics.increment_items_extracted();
                        match pipeline.submit(book).await {
                            Ok(()) | Err(PipelineError::Closed) => {}
                            Err(e) => log::error!("pipeline process error: {}", e),
                        }
                    }
                    Ok(next)
                }
                Err(failure) => {
                    metrics.record_failure(duration);
                    Err(failure)
                }
            };

            if !delay.is_zero() {
                sleep(delay).await;
            }
            Fetched { url, outcome }
        });
    }

    fn settle(
        &self,
        fetched: Fetched,
        retry: &RetryScheduler,
        frontier: &mpsc::UnboundedSender<String>,
        visited: &mut HashSet<String>,
        tally: &mut Tally,
        cancelled: bool,
    ) {
        let Fetched { url, outcome } = fetched;
        match outcome {
            Ok(Some(next)) => {
                let page = self.metrics.increment_pages();
                if cancelled || page >= u64::from(self.config.max_pages) {
                    log::debug!("Not following {} (page {} of {})", next, page, self.config.max_pages);
                    return;
                }
                if visited.insert(next.clone()) && frontier.send(next).is_err() {
                    log::warn!("frontier closed, dropping next page");
                }
            }
            Ok(None) => log::debug!("Last page reached at {}", url),
            Err(failure) => {
                let kind = failure.kind();
                tally.error_count += 1;
                *tally
                    .errors_by_kind
                    .entry(kind.label().to_string())
                    .or_insert(0) += 1;
                self.metrics.record_error(kind);
                log::error!("request error url={} category={} error={}", url, kind.label(), failure);

                if !retry.schedule(&url) {
                    log::warn!("giving up on {} after {} retries", url, retry.attempts(&url));
                    tally.failed_urls.push(url);
                }
            }
        }
    }

    fn politeness_delay(&self) -> Duration {
        let jitter = if self.config.random_delay_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.random_delay_ms)
        } else {
            0
        };
        self.config.delay() + Duration::from_millis(jitter)
    }

    fn set_state(&self, state: CrawlerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_base_url_without_host() {
        let config = ScraperConfig {
            base_url: "file:///tmp/catalog".to_string(),
            ..ScraperConfig::default()
        };
        assert!(matches!(Scraper::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_unparsable_base_url() {
        let config = ScraperConfig {
            base_url: "not a url".to_string(),
            ..ScraperConfig::default()
        };
        assert!(matches!(Scraper::new(config), Err(Error::Url(_))));
    }

    #[test]
    fn test_politeness_delay_within_jitter() {
        let config = ScraperConfig {
            delay_ms: 10,
            random_delay_ms: 5,
            ..ScraperConfig::default()
        };
        let scraper = Scraper::new(config).unwrap();
        for _ in 0..20 {
            let delay = scraper.politeness_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
        assert_eq!(scraper.state(), CrawlerState::Idle);
    }
}
