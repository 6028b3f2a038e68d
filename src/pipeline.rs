//! Bounded, deduplicating, batching pipeline between the scraper and an
//! [`OutputSink`].
//!
//! Producers call [`Pipeline::submit`], which waits while the buffer is full.
//! Each worker pulls from the shared buffer, validates, deduplicates and
//! normalizes the record, then appends it to a private batch that is flushed
//! to the sink once it reaches `batch_size`. [`Pipeline::close`] stops
//! intake, lets workers drain the buffer and flush their partial batches, and
//! gives up after `drain_timeout` if the sink stops making progress.

use crate::config::ScraperConfig;
use crate::dedup::DedupCache;
use crate::error::Error;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::model::Book;
use crate::normalize::{normalize_book, validate_book, ValidationFailure};
use crate::output::OutputSink;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BUFFER_SIZE: usize = 512;
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("pipeline: closed")]
    Closed,

    #[error("write batch: {0}")]
    Sink(#[source] Arc<Error>),

    #[error("pipeline: writers did not drain within {0:?}")]
    DrainTimeout(Duration),

    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub buffer_size: usize,
    pub batch_size: usize,
    pub drain_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl From<&ScraperConfig> for PipelineOptions {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            buffer_size: config.pipeline_buffer_size,
            batch_size: config.batch_size,
            drain_timeout: config.drain_timeout(),
        }
    }
}

#[derive(Default)]
struct State {
    closed: bool,
    started: bool,
    error: Option<PipelineError>,
    // set once a drain gave up; stuck writers keep running
    drain_timed_out: Option<Duration>,
}

struct Shared {
    sink: Arc<dyn OutputSink>,
    batch_size: usize,
    drain_timeout: Duration,
    sender: Mutex<Option<mpsc::Sender<Book>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Book>>,
    seen: DedupCache,
    metrics: MetricsCollector,
    state: Mutex<State>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn new(
        sink: Arc<dyn OutputSink>,
        metrics: MetricsCollector,
        options: PipelineOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.buffer_size.max(1));

        Self {
            shared: Arc::new(Shared {
                sink,
                batch_size: options.batch_size.max(1),
                drain_timeout: options.drain_timeout,
                sender: Mutex::new(Some(tx)),
                receiver: tokio::sync::Mutex::new(rx),
                seen: DedupCache::new(),
                metrics,
                state: Mutex::new(State::default()),
                shutdown: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Launches `workers` consumers (at least one). Does nothing once closed.
    pub fn start(&self, workers: usize) {
        {
            let mut state = self.shared.state();
            if state.closed {
                log::warn!("pipeline: start called after close, ignoring");
                return;
            }
            state.started = true;
        }

        let workers = workers.max(1);
        self.shared.spawn_workers(workers);
        log::debug!("pipeline: started {} workers", workers);
    }

    /// Enqueues one record, waiting while the buffer is full.
    ///
    /// Fails with [`PipelineError::Closed`] once the pipeline has been
    /// closed or has failed, including while this call is waiting.
    pub async fn submit(&self, book: Book) -> Result<(), PipelineError> {
        {
            let state = self.shared.state();
            if state.closed || state.error.is_some() {
                return Err(PipelineError::Closed);
            }
        }

        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::Closed)?;

        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(PipelineError::Closed),
            sent = sender.send(book) => sent.map_err(|_| PipelineError::Closed),
        }
    }

    /// Submits records in order, stopping at the first rejection.
    pub async fn submit_all(
        &self,
        books: impl IntoIterator<Item = Book>,
    ) -> Result<(), PipelineError> {
        for book in books {
            self.submit(book).await?;
        }
        Ok(())
    }

    /// Stops intake, waits for workers to drain and flush, and returns the
    /// first error any worker hit.
    ///
    /// Records accepted before any worker was started are drained by a
    /// single worker spawned here.
    ///
    /// Returns [`PipelineError::DrainTimeout`] if the workers are still busy
    /// after the drain timeout, and again on every later call. Stuck writers
    /// are left running.
    pub async fn close(&self) -> Result<(), PipelineError> {
        let never_started = {
            let mut state = self.shared.state();
            if let Some(waited) = state.drain_timed_out {
                return Err(PipelineError::DrainTimeout(waited));
            }
            state.closed = true;
            !std::mem::replace(&mut state.started, true)
        };
        self.shared.stop_intake();

        if never_started {
            log::debug!("pipeline: closed before start, draining with one worker");
            self.shared.spawn_workers(1);
        }

        let handles = std::mem::take(&mut *self.shared.workers());
        let drained =
            tokio::time::timeout(self.shared.drain_timeout, futures::future::join_all(handles))
                .await;

        match drained {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        self.shared.set_error(PipelineError::Worker(e.to_string()));
                    }
                }
            }
            Err(_) => {
                log::error!(
                    "pipeline: sink made no progress within {:?}, abandoning drain",
                    self.shared.drain_timeout
                );
                self.shared.state().drain_timed_out = Some(self.shared.drain_timeout);
                return Err(PipelineError::DrainTimeout(self.shared.drain_timeout));
            }
        }

        log::debug!(
            "pipeline: closed with {} unique records",
            self.shared.seen.len()
        );

        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// First error recorded by a worker, if any.
    pub fn err(&self) -> Option<PipelineError> {
        self.shared.state().error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Logs progress every `interval` until the pipeline closes.
    pub fn start_metrics_reporting(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = shared.metrics.snapshot();
                        log::info!(
                            "pipeline: processed={} validation_errors={}",
                            snapshot.processed,
                            snapshot.validation_errors_total()
                        );
                    }
                }
            }
        });
    }
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_workers(self: &Arc<Self>, count: usize) {
        let mut handles = self.workers();
        let first = handles.len();
        for id in first..first + count {
            let shared = self.clone();
            handles.push(tokio::spawn(async move { shared.run_worker(id).await }));
        }
    }

    fn failed(&self) -> bool {
        self.state().error.is_some()
    }

    // Wakes blocked submitters and drops the pipeline's own sender, so the
    // buffer closes once in-flight submits return.
    fn stop_intake(&self) {
        self.shutdown.cancel();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_error(&self, err: PipelineError) {
        {
            let mut state = self.state();
            if state.error.is_some() {
                log::debug!("pipeline: discarding later error: {}", err);
                return;
            }
            log::error!("pipeline: {}", err);
            state.error = Some(err);
            state.closed = true;
        }
        self.stop_intake();
    }

    async fn run_worker(&self, id: usize) {
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(book) = next else {
                break;
            };

            // after a sink failure the buffer is drained and discarded
            if self.failed() {
                continue;
            }

            let Some(book) = self.prepare(book) else {
                continue;
            };
            batch.push(book);

            if batch.len() >= self.batch_size {
                if let Err(e) = self.flush(&mut batch).await {
                    self.set_error(e);
                }
            }
        }

        if !batch.is_empty() && !self.failed() {
            if let Err(e) = self.flush(&mut batch).await {
                self.set_error(e);
            }
        }
        log::debug!("pipeline: worker {} finished", id);
    }

    fn prepare(&self, mut book: Book) -> Option<Book> {
        if let Err(e) = validate_book(&book) {
            log::debug!("pipeline: dropping invalid record {}: {}", book.url, e);
            self.metrics
                .record_validation(ValidationFailure::InvalidRecord);
            return None;
        }

        if !self.seen.insert(&book.url) {
            self.metrics.record_validation(ValidationFailure::DuplicateUrl);
            return None;
        }

        normalize_book(&mut book);
        self.metrics.increment_processed();
        Some(book)
    }

    async fn flush(&self, batch: &mut Vec<Book>) -> Result<(), PipelineError> {
        let full = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        self.sink
            .write(full)
            .await
            .map_err(|e| PipelineError::Sink(Arc::new(e)))
    }
}
