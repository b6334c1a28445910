use serde::{Deserialize, Serialize};

/// Name of the queue used when none is given
pub const DEFAULT_QUEUE: &str = "default";

/// Submission context: which queue, and the request that caused it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCtx {
    pub queue: String,

    /// Correlates the job's log lines with the HTTP request that submitted it
    pub request_id: Option<String>,
}

impl QueueCtx {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl Default for QueueCtx {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}
