use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClaimToken, JobId, JobMessage};
use crate::QueueError;

/// Job status lifecycle: `Pending → Processing → Succeeded | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,

    /// Claimed by a worker
    Processing,

    Succeeded,

    Failed,
}

impl JobStatus {
    /// Succeeded and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(QueueError::Internal(format!("Unknown job status '{other}'"))),
        }
    }
}

/// What a worker reports for a claimed job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Value),
    Failed(String),
}

/// Job record - mutable runtime state stored by backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    /// Immutable job message data
    pub message: JobMessage,

    pub status: JobStatus,

    /// Times the job has been claimed
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Token of the current (or last) claim
    pub claim_token: Option<ClaimToken>,

    /// JSON result, set once on success
    pub result: Option<Value>,

    /// Error message, set once on failure
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(job_id: JobId, message: JobMessage) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            message,
            status: JobStatus::Pending,
            attempt: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            claim_token: None,
            result: None,
            error: None,
        }
    }

    /// Move to Processing under a fresh token.
    pub fn claim(&mut self, token: ClaimToken) {
        self.status = JobStatus::Processing;
        self.attempt += 1;
        self.claim_token = Some(token);
        self.updated_at = Utc::now();
    }

    /// Check a report against the record. Terminal records refuse every
    /// report, whatever token it carries.
    pub fn check_report(&self, token: &ClaimToken) -> Result<(), QueueError> {
        if self.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if self.status != JobStatus::Processing || self.claim_token.as_ref() != Some(token) {
            return Err(QueueError::InvalidClaimToken);
        }
        Ok(())
    }

    /// Apply a checked outcome.
    pub fn finish(&mut self, outcome: JobOutcome) {
        let now = Utc::now();
        match outcome {
            JobOutcome::Succeeded(value) => {
                self.status = JobStatus::Succeeded;
                self.result = Some(value);
            }
            JobOutcome::Failed(error) => {
                self.status = JobStatus::Failed;
                self.error = Some(error);
            }
        }
        self.finished_at = Some(now);
        self.updated_at = now;
    }
}

/// A job handed to a worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub record: JobRecord,
    pub claim_token: ClaimToken,
}

impl ClaimedJob {
    pub fn job_id(&self) -> &JobId {
        &self.record.job_id
    }

    pub fn message(&self) -> &JobMessage {
        &self.record.message
    }
}

/// Client view of a job: `{ready, successful, value}`.
///
/// Until the job is terminal (or when the id is unknown) all three say
/// "not yet": `ready=false`, `successful=null`, `value=null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPoll {
    pub ready: bool,
    pub successful: Option<bool>,
    pub value: Option<Value>,
}

impl JobPoll {
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            successful: None,
            value: None,
        }
    }

    pub fn from_record(record: Option<&JobRecord>) -> Self {
        let Some(record) = record else {
            return Self::not_ready();
        };
        match record.status {
            JobStatus::Succeeded => Self {
                ready: true,
                successful: Some(true),
                value: Some(record.result.clone().unwrap_or(Value::Null)),
            },
            JobStatus::Failed => Self {
                ready: true,
                successful: Some(false),
                value: record.error.clone().map(Value::String),
            },
            JobStatus::Pending | JobStatus::Processing => Self::not_ready(),
        }
    }
}
