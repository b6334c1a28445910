use async_trait::async_trait;
use chrono::NaiveDateTime;
use enf_core::FrequencySample;

use crate::StoreResult;

/// Persistent home of reference samples, keyed by `(dataset, timestamp)`.
#[async_trait]
pub trait RangeStore: Send + Sync {
    /// Samples of `dataset` with `start <= timestamp < end`, ascending.
    async fn query(
        &self,
        dataset: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> StoreResult<Vec<FrequencySample>>;

    /// Insert a batch atomically.
    ///
    /// A sample whose `(dataset, timestamp)` already exists is discarded
    /// without failing the batch. Returns the number of rows written.
    async fn insert_many(&self, samples: &[FrequencySample]) -> StoreResult<usize>;

    /// Number of rows held for `dataset`.
    async fn count(&self, dataset: &str) -> StoreResult<usize>;
}
