pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::{
    ClaimToken, ClaimedJob, JobId, JobMessage, JobOutcome, JobRecord, QueueError, QueueEvent,
    QueueResult,
};

/// Error stored on a job whose claim expired
pub const LEASE_EXPIRED: &str = "Job lease expired";

/// Instant `age` before now
pub(crate) fn cutoff(age: Duration) -> QueueResult<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age)
        .map_err(|e| QueueError::Internal(format!("Duration out of range: {e}")))?;
    Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| QueueError::Internal("Duration out of range".to_string()))
}

/// Type alias for boxed streams
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Storage primitives behind the queue
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a Pending job and return its id
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId>;

    /// Atomically move the oldest Pending job of any listed queue to Processing.
    ///
    /// Two concurrent claims never receive the same job.
    async fn claim(&self, queues: &[&str]) -> QueueResult<Option<ClaimedJob>>;

    /// Record the outcome of a claimed job.
    ///
    /// First write wins: a terminal job refuses every later report with
    /// `JobAlreadyTerminal`; a token other than the job's claim is refused
    /// with `InvalidClaimToken`.
    async fn report(&self, job_id: &JobId, token: &ClaimToken, outcome: JobOutcome) -> QueueResult<()>;

    /// Fail every Processing job claimed longer than `lease` ago and return
    /// their ids. Their claim tokens stop being honoured.
    async fn expire_claims(&self, lease: Duration) -> QueueResult<Vec<JobId>>;

    /// Full record, `None` for an unknown id
    async fn get_record(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Lifecycle events emitted by this process
    fn event_stream(&self) -> BoxStream<QueueEvent>;
}
