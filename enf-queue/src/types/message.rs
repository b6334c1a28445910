use serde::{Deserialize, Serialize};

/// Job message - immutable submission data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Job type identifier for dispatch
    pub job_type: String,

    /// JSON-encoded job
    pub payload_bytes: Vec<u8>,

    /// Target queue name
    pub queue: String,

    pub request_id: Option<String>,
}

impl JobMessage {
    pub fn new(job_type: impl Into<String>, payload_bytes: Vec<u8>, queue: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            payload_bytes,
            queue: queue.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}
