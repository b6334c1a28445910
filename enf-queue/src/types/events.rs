use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Lifecycle notifications broadcast by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Enqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        at: DateTime<Utc>,
    },

    Claimed {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    Succeeded {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Claimed { .. } => "claimed",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Succeeded { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Claimed { at, .. }
            | Self::Succeeded { at, .. }
            | Self::Failed { at, .. } => at,
        }
    }
}
