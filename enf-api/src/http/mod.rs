//! HTTP surface.
//!
//! | route | |
//! |---|---|
//! | `POST /match?db=&from=&to=` | upload a WAV (`file` field), returns `202 {task_id}` |
//! | `GET /match/result/{task_id}` | `{ready, successful, value}` |
//! | `GET /datasets` | registered dataset names |
//! | `GET /datasets/{name}?from=&to=` | reference samples, ascending |
//! | `GET /datasets/{name}/months` | months the provider publishes |
//! | `GET /datasets/{name}/{year}/{month}` | `{times, enf}` for a whole month |
//!
//! Errors are JSON bodies produced by [`EnfError::to_json`](enf_core::EnfError::to_json).

mod error;
mod routes;

pub use error::ApiError;
pub use routes::{router, AppState};
