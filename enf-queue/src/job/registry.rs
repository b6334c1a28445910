use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Job, JobError, JobMessage, QueueError, QueueResult};

/// Execution context as the worker holds it; handlers downcast it.
pub type AnyContext = Arc<dyn Any + Send + Sync>;

/// Type-erased job handler for runtime dispatch
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, message: &JobMessage, context: AnyContext) -> Result<Value, JobError>;

    fn job_type(&self) -> &'static str;
}

struct ConcreteJobHandler<J: Job> {
    _phantom: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J: Job> JobHandler for ConcreteJobHandler<J> {
    async fn execute(&self, message: &JobMessage, context: AnyContext) -> Result<Value, JobError> {
        let job: J = serde_json::from_slice(&message.payload_bytes)
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;

        let typed_context = context
            .downcast_ref::<J::Context>()
            .ok_or_else(|| JobError::failed(format!("Invalid context type for {}", J::JOB_TYPE)))?
            .clone();

        let result = job.execute(typed_context).await?;

        serde_json::to_value(&result)
            .map_err(|e| JobError::failed(format!("Failed to serialize result: {e}")))
    }

    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }
}

/// Registry for managing job types and their handlers
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type
    pub fn register<J: Job>(&mut self) -> QueueResult<()> {
        let handler: Arc<dyn JobHandler> = Arc::new(ConcreteJobHandler::<J> {
            _phantom: PhantomData,
        });
        let job_type = handler.job_type().to_string();

        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::JobTypeAlreadyRegistered(job_type));
        }

        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Handler for a job type, detached from the registry
    pub fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Execute a job by message
    pub async fn execute_job(&self, message: &JobMessage, context: AnyContext) -> Result<Value, JobError> {
        let handler = self
            .handler(&message.job_type)
            .ok_or_else(|| JobError::UnknownJobType(message.job_type.clone()))?;

        handler.execute(message, context).await
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}
