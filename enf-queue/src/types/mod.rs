pub mod ctx;
pub mod events;
pub mod ids;
pub mod message;
pub mod record;

pub use ctx::QueueCtx;
pub use events::QueueEvent;
pub use ids::{ClaimToken, JobId};
pub use message::JobMessage;
pub use record::{ClaimedJob, JobOutcome, JobPoll, JobRecord, JobStatus};
