use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::backend::{BoxStream, QueueBackend};
use crate::job::JobRegistry;
use crate::reaper::LeaseReaper;
use crate::{
    ClaimToken, Job, JobError, JobId, JobMessage, JobOutcome, JobPoll, JobRecord, LiveMetrics,
    QueueCtx, QueueError, QueueEvent, QueueResult,
};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Workers started by [`QueueAdapter::start_workers`]
    pub workers: usize,
    /// Idle wait when no job is pending
    pub poll_interval: Duration,
    /// Wait after a backend error before trying again
    pub error_backoff: Duration,
    /// A claim older than this is given up and its job marked Failed
    pub lease_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            lease_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Handle for stopping a worker pool
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Number of job workers, not counting the lease reaper
    pub fn len(&self) -> usize {
        self.join_handles.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Let running jobs finish, then stop every worker.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {e}")))?;
        }
        Ok(())
    }
}

/// Front door of the queue: submission, polling and the worker pool
#[derive(Clone)]
pub struct QueueAdapter {
    backend: Arc<dyn QueueBackend>,
    job_registry: Arc<RwLock<JobRegistry>>,
    metrics: Arc<LiveMetrics>,
    config: QueueConfig,
}

impl QueueAdapter {
    pub fn new<B: QueueBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            job_registry: Arc::new(RwLock::new(JobRegistry::new())),
            metrics: Arc::new(LiveMetrics::new()),
            config: QueueConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a job type for processing
    pub async fn register_job<J: Job>(&self) -> QueueResult<()> {
        self.job_registry.write().await.register::<J>()?;
        info!(job_type = J::JOB_TYPE, "registered job type");
        Ok(())
    }

    /// Enqueue a job; returns as soon as it is stored
    #[instrument(skip(self, job), fields(job_type = J::JOB_TYPE, queue = %ctx.queue))]
    pub async fn enqueue<J: Job>(&self, ctx: QueueCtx, job: J) -> QueueResult<JobId> {
        let payload = serde_json::to_vec(&job)?;
        let message = JobMessage::new(J::JOB_TYPE, payload, ctx.queue).with_request_id(ctx.request_id);

        let job_id = self.backend.enqueue(message).await?;
        self.metrics.record_enqueued(J::JOB_TYPE);

        info!(%job_id, "enqueued job");
        Ok(job_id)
    }

    pub async fn record(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.backend.get_record(job_id).await
    }

    /// Client view of a job; an unknown id reads as not ready
    pub async fn poll(&self, job_id: &JobId) -> QueueResult<JobPoll> {
        let record = self.backend.get_record(job_id).await?;
        Ok(JobPoll::from_record(record.as_ref()))
    }

    pub fn events(&self) -> BoxStream<QueueEvent> {
        self.backend.event_stream()
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Start `config.workers` workers pulling from `queues`
    #[instrument(skip(self, context), fields(workers = self.config.workers, queues = ?queues))]
    pub async fn start_workers<C>(&self, context: C, queues: Vec<String>) -> QueueResult<WorkerHandle>
    where
        C: Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context: Arc<dyn Any + Send + Sync> = Arc::new(context);

        let mut join_handles = (0..self.config.workers.max(1))
            .map(|index| {
                let worker = Worker {
                    adapter: self.clone(),
                    index,
                    context: context.clone(),
                    queues: queues.clone(),
                    shutdown_rx: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        info!(count = join_handles.len(), "started workers");
        let reaper = LeaseReaper::new(self.backend.clone(), self.config.lease_timeout);
        join_handles.push(tokio::spawn(reaper.run(shutdown_rx)));

        Ok(WorkerHandle {
            shutdown_tx,
            join_handles,
        })
    }
}

/// One worker of the pool
struct Worker {
    adapter: QueueAdapter,
    index: usize,
    context: Arc<dyn Any + Send + Sync>,
    queues: Vec<String>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker = self.index, queues = ?self.queues, "worker started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            // A claimed job always runs to completion; shutdown is only
            // observed between jobs.
            let idle = match self.process_next_job().await {
                Ok(true) => None,
                Ok(false) => Some(self.adapter.config.poll_interval),
                Err(e) => {
                    error!(worker = self.index, error = %e, "error processing job");
                    Some(self.adapter.config.error_backoff)
                }
            };

            if let Some(wait) = idle {
                tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        info!(worker = self.index, "worker stopped");
    }

    /// Claim, execute and report one job. `Ok(false)` when nothing was pending.
    async fn process_next_job(&self) -> QueueResult<bool> {
        let queue_refs: Vec<&str> = self.queues.iter().map(String::as_str).collect();
        let Some(claimed) = self.adapter.backend.claim(&queue_refs).await? else {
            return Ok(false);
        };
        self.adapter.metrics.record_claimed();

        let job_id = claimed.record.job_id.clone();
        let message = &claimed.record.message;
        let span = info_span!(
            "job",
            %job_id,
            job_type = %message.job_type,
            request_id = message.request_id.as_deref().unwrap_or("-"),
            worker = self.index,
        );

        let started = Instant::now();
        // The registry guard is released before the job runs.
        let handler = self.adapter.job_registry.read().await.handler(&message.job_type);
        let executed = match handler {
            Some(handler) => {
                AssertUnwindSafe(handler.execute(message, self.context.clone()))
                    .catch_unwind()
                    .instrument(span.clone())
                    .await
            }
            None => Ok(Err(JobError::UnknownJobType(message.job_type.clone()))),
        };
        let elapsed = started.elapsed();

        let outcome = match executed {
            Ok(Ok(value)) => JobOutcome::Succeeded(value),
            Ok(Err(job_error)) => JobOutcome::Failed(job_error.message()),
            Err(_) => JobOutcome::Failed("Job panicked during execution".to_string()),
        };

        span.in_scope(|| match &outcome {
            JobOutcome::Succeeded(_) => {
                self.adapter.metrics.record_succeeded(&message.job_type, elapsed);
                info!(elapsed_ms = elapsed.as_millis() as u64, "job succeeded");
            }
            JobOutcome::Failed(error) => {
                self.adapter.metrics.record_failed(&message.job_type, elapsed);
                warn!(elapsed_ms = elapsed.as_millis() as u64, %error, "job failed");
            }
        });

        self.report(&job_id, &claimed.claim_token, outcome)
            .instrument(span)
            .await?;

        Ok(true)
    }

    /// Deliver an outcome until the backend stores it or the job is settled
    /// some other way. Gives up only on shutdown; the lease reaper then fails
    /// the job.
    async fn report(&self, job_id: &JobId, token: &ClaimToken, outcome: JobOutcome) -> QueueResult<()> {
        let mut attempt = 1u32;
        loop {
            match self.adapter.backend.report(job_id, token, outcome.clone()).await {
                Ok(()) => {
                    debug!(attempt, "result recorded");
                    return Ok(());
                }
                Err(QueueError::JobAlreadyTerminal) => {
                    self.adapter.metrics.record_duplicate_report();
                    warn!("job already has a result; keeping the first one");
                    return Ok(());
                }
                Err(QueueError::InvalidClaimToken) => {
                    warn!("claim no longer held; result dropped");
                    return Ok(());
                }
                Err(e) if *self.shutdown_rx.borrow() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "report failed; retrying");
                    tokio::time::sleep(self.adapter.config.error_backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct Greeting(String);

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Greet {
        name: String,
    }

    #[async_trait]
    impl Job for Greet {
        type Context = Greeting;
        type Result = String;

        const JOB_TYPE: &'static str = "greet";

        async fn execute(&self, ctx: Greeting) -> Result<String, JobError> {
            if self.name.is_empty() {
                return Err(JobError::failed("nobody to greet"));
            }
            Ok(format!("{} {}", ctx.0, self.name))
        }
    }

    #[tokio::test]
    async fn enqueue_records_pending_job() {
        let adapter = QueueAdapter::new(MemoryBackend::new());
        let job_id = adapter
            .enqueue(QueueCtx::default().with_request_id("req-1"), Greet { name: "eso".into() })
            .await
            .unwrap();

        let record = adapter.record(&job_id).await.unwrap().unwrap();
        assert_eq!(record.status, crate::JobStatus::Pending);
        assert_eq!(record.message.request_id.as_deref(), Some("req-1"));
        assert_eq!(adapter.poll(&job_id).await.unwrap(), JobPoll::not_ready());
        assert_eq!(adapter.metrics().jobs_enqueued(), 1);
    }

    #[tokio::test]
    async fn worker_runs_jobs_to_terminal_state() {
        let adapter = QueueAdapter::new(MemoryBackend::new()).with_config(QueueConfig {
            workers: 1,
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        });
        adapter.register_job::<Greet>().await.unwrap();

        let ok = adapter.enqueue(QueueCtx::default(), Greet { name: "grid".into() }).await.unwrap();
        let bad = adapter.enqueue(QueueCtx::default(), Greet { name: String::new() }).await.unwrap();

        let workers = adapter
            .start_workers(Greeting("hello".into()), vec!["default".into()])
            .await
            .unwrap();

        let mut polls = (JobPoll::not_ready(), JobPoll::not_ready());
        for _ in 0..200 {
            polls = (adapter.poll(&ok).await.unwrap(), adapter.poll(&bad).await.unwrap());
            if polls.0.ready && polls.1.ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        workers.shutdown().await.unwrap();

        assert_eq!(polls.0.successful, Some(true));
        assert_eq!(polls.0.value, Some(serde_json::json!("hello grid")));
        assert_eq!(polls.1.successful, Some(false));
        assert_eq!(polls.1.value, Some(serde_json::json!("nobody to greet")));
        assert_eq!(adapter.metrics().jobs_failed(), 1);
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Enroll;

    #[async_trait]
    impl Job for Enroll {
        type Context = QueueAdapter;
        type Result = bool;

        const JOB_TYPE: &'static str = "enroll";

        async fn execute(&self, queue: QueueAdapter) -> Result<bool, JobError> {
            // Needs the registry write lock while this job is still running.
            tokio::time::timeout(Duration::from_secs(1), queue.register_job::<Greet>())
                .await
                .map_err(|_| JobError::failed("registry locked by running job"))?
                .map_err(|e| JobError::failed(e.to_string()))?;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn running_job_does_not_hold_the_registry() {
        let adapter = QueueAdapter::new(MemoryBackend::new()).with_config(QueueConfig {
            workers: 1,
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        });
        adapter.register_job::<Enroll>().await.unwrap();
        let job_id = adapter.enqueue(QueueCtx::default(), Enroll).await.unwrap();

        let workers = adapter
            .start_workers(adapter.clone(), vec!["default".into()])
            .await
            .unwrap();
        let mut poll = JobPoll::not_ready();
        for _ in 0..400 {
            poll = adapter.poll(&job_id).await.unwrap();
            if poll.ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        workers.shutdown().await.unwrap();

        assert_eq!(poll.successful, Some(true));
        assert!(adapter.job_registry.read().await.is_registered("greet"));
    }
}
