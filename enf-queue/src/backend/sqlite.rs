//! Durable backend shared by every process pointing at the same database.
//!
//! Claims are a single `UPDATE … RETURNING` on the oldest pending row, so two
//! workers (in one process or several) never receive the same job. Reports are
//! conditional updates on `status = 'processing' AND claim_token = ?`; the first
//! one to land wins.
//!
//! Lease expiry is the same kind of conditional update, so an expired job and
//! a late report cannot both land.
//!
//! Events are only broadcast to subscribers inside the emitting process.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::backend::{cutoff, BoxStream, QueueBackend, LEASE_EXPIRED};
use crate::{
    ClaimToken, ClaimedJob, JobId, JobMessage, JobOutcome, JobRecord, JobStatus, QueueError,
    QueueEvent, QueueResult,
};

const RECORD_COLUMNS: &str = "id, queue, job_type, payload, request_id, status, attempt, \
     claim_token, result, error, created_at, updated_at, finished_at";

#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    event_broadcaster: broadcast::Sender<QueueEvent>,
}

impl SqliteBackend {
    pub async fn connect(url: &str) -> QueueResult<Self> {
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

    pub async fn from_pool(pool: SqlitePool) -> QueueResult<Self> {
        let (event_broadcaster, _) = broadcast::channel(1000);
        let backend = Self {
            pool,
            event_broadcaster,
        };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_jobs (
                id          TEXT    PRIMARY KEY,
                queue       TEXT    NOT NULL,
                job_type    TEXT    NOT NULL,
                payload     BLOB    NOT NULL,
                request_id  TEXT,
                status      TEXT    NOT NULL,
                attempt     INTEGER NOT NULL DEFAULT 0,
                claim_token TEXT,
                result      TEXT,
                error       TEXT,
                created_at  TEXT    NOT NULL,
                updated_at  TEXT    NOT NULL,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_queue_jobs_pending ON queue_jobs (queue, status, created_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    fn record_from_row(row: &SqliteRow) -> QueueResult<JobRecord> {
        let status: String = row.try_get("status")?;
        let result: Option<String> = row.try_get("result")?;
        let attempt: i64 = row.try_get("attempt")?;
        let claim_token: Option<String> = row.try_get("claim_token")?;

        Ok(JobRecord {
            job_id: JobId(row.try_get("id")?),
            message: JobMessage {
                job_type: row.try_get("job_type")?,
                payload_bytes: row.try_get("payload")?,
                queue: row.try_get("queue")?,
                request_id: row.try_get("request_id")?,
            },
            status: JobStatus::from_str(&status)?,
            attempt: attempt as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            finished_at: row.try_get("finished_at")?,
            claim_token: claim_token.map(ClaimToken),
            result: result.map(|raw| serde_json::from_str(&raw)).transpose()?,
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl QueueBackend for SqliteBackend {
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        let record = JobRecord::new(JobId::new(), message);

        sqlx::query(
            r#"
            INSERT INTO queue_jobs (id, queue, job_type, payload, request_id, status, attempt, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
            "#,
        )
        .bind(record.job_id.as_str())
        .bind(&record.message.queue)
        .bind(&record.message.job_type)
        .bind(&record.message.payload_bytes)
        .bind(&record.message.request_id)
        .bind(JobStatus::Pending.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        self.emit(QueueEvent::Enqueued {
            job_id: record.job_id.clone(),
            queue: record.message.queue,
            job_type: record.message.job_type,
            at: record.created_at,
        });
        Ok(record.job_id)
    }

    async fn claim(&self, queues: &[&str]) -> QueueResult<Option<ClaimedJob>> {
        for queue in queues {
            let token = ClaimToken::new();
            let now = Utc::now();
            let sql = format!(
                r#"
                UPDATE queue_jobs
                SET status = 'processing', attempt = attempt + 1, claim_token = ?1, updated_at = ?2
                WHERE id = (
                    SELECT id FROM queue_jobs
                    WHERE queue = ?3 AND status = 'pending'
                    ORDER BY created_at ASC, rowid ASC
                    LIMIT 1
                )
                AND status = 'pending'
                RETURNING {RECORD_COLUMNS}
                "#
            );
            let row = sqlx::query(&sql)
                .bind(token.as_str())
                .bind(now)
                .bind(*queue)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                let record = Self::record_from_row(&row)?;
                self.emit(QueueEvent::Claimed {
                    job_id: record.job_id.clone(),
                    attempt: record.attempt,
                    at: now,
                });
                return Ok(Some(ClaimedJob {
                    record,
                    claim_token: token,
                }));
            }
        }
        Ok(None)
    }

    async fn report(&self, job_id: &JobId, token: &ClaimToken, outcome: JobOutcome) -> QueueResult<()> {
        let now: DateTime<Utc> = Utc::now();
        let (status, result, error) = match &outcome {
            JobOutcome::Succeeded(value) => (JobStatus::Succeeded, Some(serde_json::to_string(value)?), None),
            JobOutcome::Failed(message) => (JobStatus::Failed, None, Some(message.clone())),
        };

        let updated = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = ?1, result = ?2, error = ?3, finished_at = ?4, updated_at = ?4
            WHERE id = ?5 AND status = 'processing' AND claim_token = ?6
            "#,
        )
        .bind(status.as_str())
        .bind(result)
        .bind(&error)
        .bind(now)
        .bind(job_id.as_str())
        .bind(token.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Explain the refusal with the same rules the memory backend applies.
            let record = self
                .get_record(job_id)
                .await?
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            record.check_report(token)?;
            return Err(QueueError::Internal(format!("Report for job {job_id} was not applied")));
        }

        debug!(%job_id, status = %status, "job finished");
        self.emit(match outcome {
            JobOutcome::Succeeded(_) => QueueEvent::Succeeded {
                job_id: job_id.clone(),
                at: now,
            },
            JobOutcome::Failed(error) => QueueEvent::Failed {
                job_id: job_id.clone(),
                error,
                at: now,
            },
        });
        Ok(())
    }

    async fn expire_claims(&self, lease: Duration) -> QueueResult<Vec<JobId>> {
        let stale_before = cutoff(lease)?;
        let now = Utc::now();

        let rows = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'failed', error = ?1, finished_at = ?2, updated_at = ?2
            WHERE status = 'processing' AND updated_at < ?3
            RETURNING id
            "#,
        )
        .bind(LEASE_EXPIRED)
        .bind(now)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        let expired = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id").map(JobId))
            .collect::<Result<Vec<_>, _>>()?;
        for job_id in &expired {
            self.emit(QueueEvent::Failed {
                job_id: job_id.clone(),
                error: LEASE_EXPIRED.to_string(),
                at: now,
            });
        }
        Ok(expired)
    }

    async fn get_record(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM queue_jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}
