//! Submission and polling of match jobs.

use enf_core::{EnfError, EnfResult, MatchJobRequest};
use enf_queue::{JobId, JobPoll, QueueAdapter, QueueCtx, QueueError, QueueResult, WorkerHandle};
use tracing::info;

use crate::match_job::{MatchContext, MatchJob};

pub const MATCH_QUEUE: &str = "matching";

/// Job ledger over a [`QueueAdapter`]. Submission returns immediately;
/// polling never fails for an unknown id.
#[derive(Clone)]
pub struct JobLedger {
    queue: QueueAdapter,
}

impl JobLedger {
    /// Wrap `queue` and register the match job type on it.
    pub async fn new(queue: QueueAdapter) -> QueueResult<Self> {
        queue.register_job::<MatchJob>().await?;
        Ok(Self { queue })
    }

    pub fn queue(&self) -> &QueueAdapter {
        &self.queue
    }

    pub async fn submit(
        &self,
        request: MatchJobRequest,
        request_id: Option<String>,
    ) -> EnfResult<JobId> {
        let mut ctx = QueueCtx::new(MATCH_QUEUE);
        if let Some(id) = request_id {
            ctx = ctx.with_request_id(id);
        }
        let dataset = request.dataset.clone();
        let job_id = self
            .queue
            .enqueue(ctx, MatchJob::new(request))
            .await
            .map_err(queue_failure)?;
        info!(%job_id, %dataset, "match submitted");
        Ok(job_id)
    }

    /// Three-valued status; any string is accepted as an id.
    pub async fn poll(&self, job_id: &str) -> EnfResult<JobPoll> {
        self.queue
            .poll(&JobId::from(job_id))
            .await
            .map_err(queue_failure)
    }

    pub async fn start_workers(&self, ctx: MatchContext) -> QueueResult<WorkerHandle> {
        self.queue
            .start_workers(ctx, vec![MATCH_QUEUE.to_string()])
            .await
    }
}

fn queue_failure(err: QueueError) -> EnfError {
    EnfError::internal(format!("Job queue unavailable: {err}")).with_source(err.into())
}
