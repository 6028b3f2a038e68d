use book_crawler::config::{OutputFormat, ScraperConfig};
use book_crawler::output::{self, CsvOutput, DualOutput, JsonOutput, OutputSink, SqliteOutput};
use book_crawler::Book;
use std::fs;

fn sample(n: usize) -> Book {
    let mut book = Book::new(
        format!("Book, \"{}\"", n),
        "51.77",
        "Three",
        format!("http://example.test/catalogue/book_{}/index.html", n),
    )
    .with_availability("In stock")
    .with_image_url("http://example.test/media/cover.jpg");
    book.rating_numeric = 3;
    book
}

#[tokio::test]
async fn test_csv_header_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("books.csv");

    let sink = CsvOutput::new(path.clone()).unwrap();
    sink.write(vec![sample(1), sample(2)]).await.unwrap();
    sink.validate().await.unwrap();
    sink.close().await.unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![
            "title",
            "price",
            "rating",
            "rating_numeric",
            "availability",
            "image_url",
            "url",
            "scraped_at"
        ]
    );

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "Book, \"1\"");
    assert_eq!(&rows[0][2], "Three");
    assert_eq!(&rows[0][3], "3");
    assert!(chrono::DateTime::parse_from_rfc3339(&rows[0][7]).is_ok());
}

#[tokio::test]
async fn test_jsonl_one_record_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("books.json");

    let sink = JsonOutput::new(path.clone()).unwrap();
    sink.write(vec![sample(1)]).await.unwrap();
    sink.write(vec![sample(2), sample(3)]).await.unwrap();
    sink.close().await.unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let books: Vec<Book> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(books.len(), 3);
    assert_eq!(books[2].url, "http://example.test/catalogue/book_3/index.html");

    let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(first["rating"], "Three");
}

#[tokio::test]
async fn test_empty_json_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonOutput::new(dir.path().join("empty.json")).unwrap();
    assert!(sink.validate().await.is_err());
}

#[tokio::test]
async fn test_dual_writes_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("books.csv");
    let json_path = dir.path().join("books.json");

    let sink = DualOutput::new(csv_path.clone(), json_path.clone()).unwrap();
    sink.write(vec![sample(1), sample(2)]).await.unwrap();
    sink.validate().await.unwrap();
    sink.close().await.unwrap();

    let csv_lines = fs::read_to_string(&csv_path).unwrap().lines().count();
    let json_lines = fs::read_to_string(&json_path).unwrap().lines().count();
    assert_eq!(csv_lines, 3);
    assert_eq!(json_lines, 2);
}

#[tokio::test]
async fn test_sqlite_upserts_by_url() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SqliteOutput::new(dir.path().join("books.db")).await.unwrap();

    assert!(sink.validate().await.is_err());

    sink.write(vec![sample(1), sample(2)]).await.unwrap();
    sink.write(vec![sample(2)]).await.unwrap();
    assert_eq!(sink.count().await.unwrap(), 2);

    sink.validate().await.unwrap();
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_create_sink_by_format() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScraperConfig {
        output_file: dir.path().join("out").join("books.csv").display().to_string(),
        output_format: OutputFormat::Dual,
        ..ScraperConfig::default()
    };

    let sink = output::create_sink(&config, None).await.unwrap();
    sink.write(vec![sample(1)]).await.unwrap();
    sink.close().await.unwrap();

    assert!(dir.path().join("out").join("books.csv").exists());
    assert!(dir.path().join("out").join("books.json").exists());
}
