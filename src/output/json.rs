use super::{ensure_non_empty, ensure_parent_dir, OutputSink};
use crate::error::Result;
use crate::model::Book;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Newline-delimited JSON, one book per line.
pub struct JsonOutput {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonOutput {
    pub fn new(path: PathBuf) -> Result<Self> {
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl OutputSink for JsonOutput {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for book in &batch {
            serde_json::to_writer(&mut *writer, book)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.path, "json")
    }
}
