use super::{ensure_parent_dir, OutputSink};
use crate::error::{Error, Result};
use crate::model::Book;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

pub const TABLE_NAME: &str = "books";

pub struct SqliteOutput {
    pool: SqlitePool,
}

impl SqliteOutput {
    pub async fn new(path: PathBuf) -> Result<Self> {
        ensure_parent_dir(&path)?;
        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&conn_str).await?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                url TEXT PRIMARY KEY, \
                title TEXT NOT NULL, \
                price TEXT NOT NULL, \
                rating TEXT NOT NULL, \
                rating_numeric INTEGER NOT NULL, \
                availability TEXT NOT NULL, \
                image_url TEXT NOT NULL, \
                scraped_at TEXT NOT NULL)",
            TABLE_NAME
        );
        sqlx::query(&query).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", TABLE_NAME);
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[async_trait]
impl OutputSink for SqliteOutput {
    async fn write(&self, batch: Vec<Book>) -> Result<()> {
        let query = format!(
            "INSERT OR REPLACE INTO {} \
             (url, title, price, rating, rating_numeric, availability, image_url, scraped_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            TABLE_NAME
        );

        let mut tx = self.pool.begin().await?;
        for book in batch {
            sqlx::query(&query)
                .bind(book.url)
                .bind(book.title)
                .bind(book.price)
                .bind(book.rating_text)
                .bind(i64::from(book.rating_numeric))
                .bind(book.availability)
                .bind(book.image_url)
                .bind(book.scraped_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        match self.count().await? {
            0 => Err(Error::Output(format!("{} table is empty", TABLE_NAME))),
            _ => Ok(()),
        }
    }
}
