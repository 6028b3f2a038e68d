use crate::config::{OutputFormat, ScraperConfig};
use crate::error::{Error, Result};
use crate::model::Book;
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod console;
pub mod csv;
pub mod dual;
pub mod json;
pub mod sqlite;

pub use self::console::ConsoleOutput;
pub use self::csv::CsvOutput;
pub use self::dual::DualOutput;
pub use self::json::JsonOutput;
pub use self::sqlite::SqliteOutput;

/// Destination for accepted batches.
///
/// Pipeline workers call `write` concurrently without holding any lock, so
/// implementations serialize internally.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, batch: Vec<Book>) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Post-run sanity check on what was written.
    async fn validate(&self) -> Result<()> {
        Ok(())
    }
}

pub async fn create_sink(
    config: &ScraperConfig,
    multi: Option<Arc<MultiProgress>>,
) -> Result<Arc<dyn OutputSink>> {
    let path = PathBuf::from(&config.output_file);
    let sink: Arc<dyn OutputSink> = match config.output_format {
        OutputFormat::Csv => Arc::new(CsvOutput::new(path)?),
        OutputFormat::Json => Arc::new(JsonOutput::new(path)?),
        OutputFormat::Dual => {
            let json_path = dual::json_path_for(&path);
            Arc::new(DualOutput::new(path, json_path)?)
        }
        OutputFormat::Sqlite => Arc::new(SqliteOutput::new(path).await?),
        OutputFormat::Console => Arc::new(ConsoleOutput::new(multi)),
    };
    Ok(sink)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!("create directory {}: {}", dir.display(), e))
        }),
        _ => Ok(()),
    }
}

pub(crate) fn ensure_non_empty(path: &Path, label: &str) -> Result<()> {
    let meta = fs::metadata(path)?;
    if meta.len() == 0 {
        return Err(Error::Output(format!("{} file is empty", label)));
    }
    Ok(())
}
