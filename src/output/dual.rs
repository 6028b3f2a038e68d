use super::{CsvOutput, JsonOutput, OutputSink};
use crate::error::{Error, Result};
use crate::model::Book;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes every batch to both a CSV file and a JSONL file.
pub struct DualOutput {
    csv: CsvOutput,
    json: JsonOutput,
}

/// `books.csv` becomes `books.json`; other names get `.json` appended.
pub fn json_path_for(csv_path: &Path) -> PathBuf {
    match csv_path.extension().and_then(|ext| ext.to_str()) {
        Some("csv") => csv_path.with_extension("json"),
        _ => {
            let mut name = csv_path.as_os_str().to_owned();
            name.push(".json");
            PathBuf::from(name)
        }
    }
}

impl DualOutput {
    pub fn new(csv_path: PathBuf, json_path: PathBuf) -> Result<Self> {
        let csv = CsvOutput::new(csv_path)
            .map_err(|e| Error::Internal(format!("failed to create CSV writer: {}", e)))?;
        let json = JsonOutput::new(json_path)
            .map_err(|e| Error::Internal(format!("failed to create JSON writer: {}", e)))?;
        Ok(Self { csv, json })
    }
}

#[async_trait]
impl OutputSink for DualOutput {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        self.csv
            .write(batch.clone())
            .await
            .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;
        self.json
            .write(batch)
            .await
            .map_err(|e| Error::Internal(format!("JSON write failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.csv.close().await {
            errors.push(format!("CSV close failed: {}", e));
        }
        if let Err(e) = self.json.close().await {
            errors.push(format!("JSON close failed: {}", e));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(errors.join("; ")))
        }
    }

    async fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.csv.validate().await {
            errors.push(format!("CSV validation failed: {}", e));
        }
        if let Err(e) = self.json.validate().await {
            errors.push(format!("JSON validation failed: {}", e));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Output(errors.join("; ")))
        }
    }
}
