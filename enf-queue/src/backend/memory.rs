use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::backend::{cutoff, BoxStream, QueueBackend, LEASE_EXPIRED};
use crate::{
    ClaimToken, ClaimedJob, JobId, JobMessage, JobOutcome, JobRecord, JobStatus, QueueError,
    QueueEvent, QueueResult,
};

/// How long finished records stay readable by default
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, JobRecord>,
    /// queue name -> pending job ids, FIFO
    queues: HashMap<String, VecDeque<JobId>>,
}

impl State {
    /// Drop terminal records that finished before `cutoff`.
    fn evict_finished(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, record| !matches!(record.finished_at, Some(finished) if finished < cutoff));
        before - self.jobs.len()
    }
}

/// In-memory backend for tests and single-process deployments.
///
/// Finished records are kept for the retention window, then evicted on the
/// next enqueue or lease sweep.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    event_broadcaster: broadcast::Sender<QueueEvent>,
    retention: Duration,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            event_broadcaster,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Pending jobs across all queues
    pub fn pending_len(&self) -> usize {
        self.state.read().queues.values().map(VecDeque::len).sum()
    }

    /// Records still held, finished ones included until evicted
    pub fn len(&self) -> usize {
        self.state.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().jobs.is_empty()
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.event_broadcaster.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), message.clone());
        let at = record.created_at;
        let horizon = cutoff(self.retention)?;

        {
            let mut state = self.state.write();
            state.evict_finished(horizon);
            state.jobs.insert(job_id.clone(), record);
            state
                .queues
                .entry(message.queue.clone())
                .or_default()
                .push_back(job_id.clone());
        }

        self.emit(QueueEvent::Enqueued {
            job_id: job_id.clone(),
            queue: message.queue,
            job_type: message.job_type,
            at,
        });
        Ok(job_id)
    }

    async fn claim(&self, queues: &[&str]) -> QueueResult<Option<ClaimedJob>> {
        let claimed = {
            let mut guard = self.state.write();
            let State { jobs, queues: pending } = &mut *guard;

            let mut found = None;
            'queues: for name in queues {
                let Some(queue) = pending.get_mut(*name) else {
                    continue;
                };
                while let Some(job_id) = queue.pop_front() {
                    let Some(record) = jobs.get_mut(&job_id) else {
                        continue;
                    };
                    if record.status != JobStatus::Pending {
                        continue;
                    }
                    let claim_token = ClaimToken::new();
                    record.claim(claim_token.clone());
                    found = Some(ClaimedJob {
                        record: record.clone(),
                        claim_token,
                    });
                    break 'queues;
                }
            }
            found
        };

        if let Some(job) = &claimed {
            self.emit(QueueEvent::Claimed {
                job_id: job.record.job_id.clone(),
                attempt: job.record.attempt,
                at: Utc::now(),
            });
        }
        Ok(claimed)
    }

    async fn report(&self, job_id: &JobId, token: &ClaimToken, outcome: JobOutcome) -> QueueResult<()> {
        let event = {
            let mut state = self.state.write();
            let record = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

            record.check_report(token)?;

            let at = Utc::now();
            let event = match &outcome {
                JobOutcome::Succeeded(_) => QueueEvent::Succeeded {
                    job_id: job_id.clone(),
                    at,
                },
                JobOutcome::Failed(error) => QueueEvent::Failed {
                    job_id: job_id.clone(),
                    error: error.clone(),
                    at,
                },
            };
            record.finish(outcome);
            event
        };

        self.emit(event);
        Ok(())
    }

    async fn expire_claims(&self, lease: Duration) -> QueueResult<Vec<JobId>> {
        let stale_before = cutoff(lease)?;
        let horizon = cutoff(self.retention)?;

        let (expired, at) = {
            let mut state = self.state.write();
            let mut expired = Vec::new();
            for record in state.jobs.values_mut() {
                if record.status == JobStatus::Processing && record.updated_at < stale_before {
                    record.finish(JobOutcome::Failed(LEASE_EXPIRED.to_string()));
                    expired.push(record.job_id.clone());
                }
            }
            state.evict_finished(horizon);
            (expired, Utc::now())
        };

        for job_id in &expired {
            self.emit(QueueEvent::Failed {
                job_id: job_id.clone(),
                error: LEASE_EXPIRED.to_string(),
                at,
            });
        }
        Ok(expired)
    }

    async fn get_record(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.state.read().jobs.get(job_id).cloned())
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}
