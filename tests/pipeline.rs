use async_trait::async_trait;
use book_crawler::error::{Error, Result};
use book_crawler::normalize::ValidationFailure;
use book_crawler::{Book, MetricsCollector, OutputSink, Pipeline, PipelineError, PipelineOptions};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CollectingSink {
    batches: Mutex<Vec<Vec<Book>>>,
}

impl CollectingSink {
    fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.batches.lock().unwrap().iter().map(Vec::len).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    fn books(&self) -> Vec<Book> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl OutputSink for CollectingSink {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Never returns from `write` until released.
struct BlockingSink {
    release: CancellationToken,
}

#[async_trait]
impl OutputSink for BlockingSink {
    async fn write(&self, _batch: Vec<Book>) -> Result<()> {
        self.release.cancelled().await;
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl OutputSink for FailingSink {
    async fn write(&self, _batch: Vec<Book>) -> Result<()> {
        Err(Error::Output("disk full".to_string()))
    }
}

fn book(n: usize) -> Book {
    Book::new(
        format!("Book {}", n),
        "Â£10.00",
        "Three",
        format!("http://example.test/catalogue/book_{}/index.html", n),
    )
    .with_availability("In stock")
}

fn options(batch_size: usize) -> PipelineOptions {
    PipelineOptions {
        buffer_size: 16,
        batch_size,
        drain_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_validation_and_dedup_are_counted() {
    let sink = Arc::new(CollectingSink::default());
    let metrics = MetricsCollector::new();
    let pipeline = Pipeline::new(sink.clone(), metrics.clone(), options(64));
    pipeline.start(2);

    pipeline.submit(book(1)).await.unwrap();
    pipeline.submit(book(1)).await.unwrap();
    pipeline
        .submit(Book::new("", "Â£1.00", "One", "http://example.test/untitled"))
        .await
        .unwrap();
    pipeline
        .submit(Book::new("No Price", "  ", "One", "http://example.test/no-price"))
        .await
        .unwrap();
    pipeline.submit(book(2)).await.unwrap();
    pipeline.close().await.unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.validation_count(ValidationFailure::InvalidRecord.label()), 2);
    assert_eq!(snapshot.validation_count(ValidationFailure::DuplicateUrl.label()), 1);

    let books = sink.books();
    assert_eq!(books.len(), 2);
    for book in books {
        assert_eq!(book.price, "10.00");
        assert_eq!(book.rating_numeric, 3);
    }
}

#[tokio::test]
async fn test_partial_batch_flushed_on_close() {
    let sink = Arc::new(CollectingSink::default());
    let pipeline = Pipeline::new(sink.clone(), MetricsCollector::new(), options(64));
    pipeline.start(1);

    pipeline.submit_all((0..65).map(book)).await.unwrap();
    pipeline.close().await.unwrap();

    assert_eq!(sink.batch_sizes(), vec![64, 1]);
}

#[tokio::test]
async fn test_close_drains_every_accepted_record() {
    let sink = Arc::new(CollectingSink::default());
    let metrics = MetricsCollector::new();
    let pipeline = Pipeline::new(sink.clone(), metrics.clone(), options(8));
    pipeline.start(2);

    pipeline.submit_all((0..100).map(book)).await.unwrap();
    pipeline.close().await.unwrap();

    assert_eq!(sink.books().len(), 100);
    assert_eq!(metrics.processed(), 100);
    assert!(pipeline.is_closed());
}

#[tokio::test]
async fn test_close_times_out_on_stuck_sink() {
    let release = CancellationToken::new();
    let sink = Arc::new(BlockingSink {
        release: release.clone(),
    });
    let pipeline = Pipeline::new(
        sink,
        MetricsCollector::new(),
        PipelineOptions {
            buffer_size: 4,
            batch_size: 1,
            drain_timeout: Duration::from_millis(25),
        },
    );
    pipeline.start(1);
    pipeline.submit(book(1)).await.unwrap();

    let started = Instant::now();
    let err = pipeline.close().await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PipelineError::DrainTimeout(_)));
    assert!(waited >= Duration::from_millis(25));
    assert!(waited < Duration::from_secs(1));

    // the writer is still stuck, so a later close reports the same failure
    let again = pipeline.close().await.unwrap_err();
    assert!(matches!(again, PipelineError::DrainTimeout(d) if d == Duration::from_millis(25)));
    release.cancel();
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let sink = Arc::new(CollectingSink::default());
    let pipeline = Pipeline::new(sink, MetricsCollector::new(), options(4));
    pipeline.start(1);
    pipeline.close().await.unwrap();

    let err = pipeline.submit(book(1)).await.unwrap_err();
    assert!(matches!(err, PipelineError::Closed));
}

#[tokio::test]
async fn test_blocked_submit_released_by_close() {
    // no workers: the buffer fills and the next submit waits
    let sink = Arc::new(CollectingSink::default());
    let metrics = MetricsCollector::new();
    let pipeline = Pipeline::new(
        sink.clone(),
        metrics.clone(),
        PipelineOptions {
            buffer_size: 1,
            batch_size: 1,
            drain_timeout: Duration::from_millis(50),
        },
    );
    pipeline.submit(book(1)).await.unwrap();

    let blocked = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(book(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());

    pipeline.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("submit should be released")
        .unwrap();
    assert!(matches!(result, Err(PipelineError::Closed)));

    let written = sink.books();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].title, "Book 1");
    assert_eq!(metrics.processed(), 1);
}

#[tokio::test]
async fn test_close_before_start_drains_buffer() {
    let sink = Arc::new(CollectingSink::default());
    let metrics = MetricsCollector::new();
    let pipeline = Pipeline::new(sink.clone(), metrics.clone(), options(2));

    pipeline.submit_all((0..3).map(book)).await.unwrap();
    pipeline.close().await.unwrap();

    assert_eq!(sink.batch_sizes(), vec![2, 1]);
    assert_eq!(metrics.processed(), 3);
    assert!(matches!(
        pipeline.submit(book(4)).await,
        Err(PipelineError::Closed)
    ));
}

#[tokio::test]
async fn test_sink_error_surfaces_from_close() {
    let pipeline = Pipeline::new(Arc::new(FailingSink), MetricsCollector::new(), options(1));
    pipeline.start(1);
    pipeline.submit(book(1)).await.unwrap();

    let mut rejected = false;
    for n in 2..50 {
        if pipeline.submit(book(n)).await.is_err() {
            rejected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(rejected, "submits should fail once the sink failed");

    let err = pipeline.close().await.unwrap_err();
    assert!(matches!(err, PipelineError::Sink(_)));
    assert!(err.to_string().contains("disk full"));
    assert!(matches!(pipeline.err(), Some(PipelineError::Sink(_))));
}

#[tokio::test]
async fn test_concurrent_duplicates_accepted_once() {
    let sink = Arc::new(CollectingSink::default());
    let metrics = MetricsCollector::new();
    let pipeline = Pipeline::new(sink.clone(), metrics.clone(), options(8));
    pipeline.start(4);

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.submit_all((0..20).map(book)).await })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap().unwrap();
    }
    pipeline.close().await.unwrap();

    assert_eq!(sink.books().len(), 20);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.processed, 20);
    assert_eq!(snapshot.validation_count(ValidationFailure::DuplicateUrl.label()), 140);
}
