use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Claim token does not match the job's current claim")]
    InvalidClaimToken,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Job type already registered: {0}")]
    JobTypeAlreadyRegistered(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a job did not produce a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job ran and failed; the message is what pollers see.
    #[error("{0}")]
    Failed(String),

    /// The stored payload could not be turned back into a job.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// No handler is registered for the job type.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Failed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
