//! SQLite-backed store.
//!
//! Rows live in `frequency_data`, unique on `(dataset, timestamp)`. Batches are
//! written in one transaction with `ON CONFLICT DO NOTHING`, so two workers
//! filling the same gap both succeed and the table keeps one row per key.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use enf_core::FrequencySample;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::{RangeStore, StoreResult};

/// Rows per INSERT statement; three binds each keeps us far under SQLite's limit.
const INSERT_CHUNK: usize = 500;

#[derive(Clone, Debug)]
pub struct SqliteRangeStore {
    pool: SqlitePool,
}

impl SqliteRangeStore {
    /// Open (creating if needed) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Share an existing pool (the queue backend may use the same one).
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS frequency_data (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset   TEXT    NOT NULL,
                timestamp TEXT    NOT NULL,
                frequency REAL    NOT NULL,
                CONSTRAINT uq_frequency_data_dataset_timestamp UNIQUE (dataset, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RangeStore for SqliteRangeStore {
    async fn query(
        &self,
        dataset: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> StoreResult<Vec<FrequencySample>> {
        let rows: Vec<(String, NaiveDateTime, f64)> = sqlx::query_as(
            r#"
            SELECT dataset, timestamp, frequency
            FROM frequency_data
            WHERE dataset = ?1 AND timestamp >= ?2 AND timestamp < ?3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(dataset)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(dataset, timestamp, frequency)| FrequencySample::new(dataset, timestamp, frequency))
            .collect())
    }

    async fn insert_many(&self, samples: &[FrequencySample]) -> StoreResult<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in samples.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO frequency_data (dataset, timestamp, frequency) ");
            builder.push_values(chunk, |mut row, sample| {
                row.push_bind(&sample.dataset)
                    .push_bind(sample.timestamp)
                    .push_bind(sample.frequency);
            });
            builder.push(" ON CONFLICT(dataset, timestamp) DO NOTHING");
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(offered = samples.len(), inserted, "persisted reference samples");
        Ok(inserted as usize)
    }

    async fn count(&self, dataset: &str) -> StoreResult<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM frequency_data WHERE dataset = ?1")
                .bind(dataset)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}
