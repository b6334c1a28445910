//! # enf-queue: background job processing
//!
//! A small job queue with the guarantees the matching pipeline relies on:
//!
//! - **Single claim**: a pending job is handed to exactly one worker, together
//!   with a [`ClaimToken`] that must accompany its result.
//! - **First write wins**: the first report moves a job to a terminal state;
//!   later reports are refused with [`QueueError::JobAlreadyTerminal`].
//! - **No retries, no cancellation**: a failed job stays failed.
//! - **Leases**: a claim older than [`QueueConfig::lease_timeout`] is given up
//!   and its job marked Failed by the [`LeaseReaper`].
//! - **Typed handlers**: jobs are plain serde structs implementing [`Job`],
//!   dispatched at runtime by their `JOB_TYPE`.
//!
//! ```rust
//! use enf_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greet {
//!     name: String,
//! }
//!
//! #[async_trait]
//! impl Job for Greet {
//!     type Context = ();
//!     type Result = String;
//!
//!     const JOB_TYPE: &'static str = "greet";
//!
//!     async fn execute(&self, _ctx: ()) -> Result<String, JobError> {
//!         Ok(format!("hello {}", self.name))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let queue = QueueAdapter::new(MemoryBackend::new());
//! queue.register_job::<Greet>().await?;
//!
//! let job_id = queue.enqueue(QueueCtx::default(), Greet { name: "grid".into() }).await?;
//! let workers = queue.start_workers((), vec!["default".into()]).await?;
//!
//! // ... poll until ready
//! let poll = queue.poll(&job_id).await?;
//! # let _ = poll;
//! workers.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod error;
pub mod job;
pub mod metrics;
pub mod reaper;
pub mod types;

pub use adapter::{QueueAdapter, QueueConfig, WorkerHandle};
pub use backend::memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use backend::sqlite::SqliteBackend;
pub use backend::QueueBackend;
pub use error::{JobError, QueueError, QueueResult};
pub use job::{Job, JobRegistry};
pub use metrics::{LiveMetrics, MetricsSnapshot};
pub use reaper::LeaseReaper;
pub use types::{
    ClaimToken, ClaimedJob, JobId, JobMessage, JobOutcome, JobPoll, JobRecord, JobStatus,
    QueueCtx, QueueEvent,
};

pub mod prelude {
    pub use crate::{
        Job, JobError, JobId, JobPoll, MemoryBackend, QueueAdapter, QueueBackend, QueueCtx,
        QueueResult,
    };
    pub use async_trait::async_trait;
}
