use super::OutputSink;
use crate::error::{Error, Result};
use crate::model::Book;
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::{Arc, Mutex, PoisonError};

pub struct ConsoleOutput {
    multi: Option<Arc<MultiProgress>>,
    // keeps lines from concurrent batches from interleaving
    lock: Mutex<()>,
}

impl ConsoleOutput {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self {
            multi,
            lock: Mutex::new(()),
        }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl OutputSink for ConsoleOutput {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        for book in &batch {
            let output = serde_json::to_string_pretty(book)?;

            if let Some(multi) = &self.multi {
                for line in output.lines() {
                    multi
                        .println(line)
                        .map_err(|e| Error::Internal(e.to_string()))?;
                }
            } else {
                for line in output.lines() {
                    println!("{}", line);
                }
            }
        }
        Ok(())
    }
}
