use super::{ensure_non_empty, ensure_parent_dir, OutputSink};
use crate::error::{Error, Result};
use crate::model::Book;
use async_trait::async_trait;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

pub const CSV_HEADER: [&str; 8] = [
    "title",
    "price",
    "rating",
    "rating_numeric",
    "availability",
    "image_url",
    "url",
    "scraped_at",
];

pub struct CsvOutput {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvOutput {
    /// Creates the file and writes the header row immediately.
    pub fn new(path: PathBuf) -> Result<Self> {
        ensure_parent_dir(&path)?;
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    fn row(book: &Book) -> [String; 8] {
        [
            book.title.clone(),
            book.price.clone(),
            book.rating_text.clone(),
            book.rating_numeric.to_string(),
            book.availability.clone(),
            book.image_url.clone(),
            book.url.clone(),
            book.scraped_at.to_rfc3339(),
        ]
    }
}

#[async_trait]
impl OutputSink for CsvOutput {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for book in &batch {
            writer.write_record(Self::row(book))?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .map_err(|e| Error::Internal(format!("flush csv writer: {}", e)))
    }

    async fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.path, "csv")
    }
}
