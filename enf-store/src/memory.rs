//! In-process store, keyed the same way the sqlite table is.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use enf_core::FrequencySample;
use parking_lot::RwLock;

use crate::{RangeStore, StoreResult};

type Key = (String, NaiveDateTime);

#[derive(Clone, Default)]
pub struct MemoryRangeStore {
    rows: Arc<RwLock<BTreeMap<Key, f64>>>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across every dataset.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl RangeStore for MemoryRangeStore {
    async fn query(
        &self,
        dataset: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> StoreResult<Vec<FrequencySample>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let lo = (dataset.to_string(), start);
        let hi = (dataset.to_string(), end);
        let rows = self.rows.read();
        Ok(rows
            .range(lo..hi)
            .map(|((name, ts), f)| FrequencySample::new(name.clone(), *ts, *f))
            .collect())
    }

    async fn insert_many(&self, samples: &[FrequencySample]) -> StoreResult<usize> {
        // Single write guard: the batch lands all at once or not at all.
        let mut rows = self.rows.write();
        let mut inserted = 0;
        for sample in samples {
            let key = (sample.dataset.clone(), sample.timestamp);
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(key) {
                slot.insert(sample.frequency);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count(&self, dataset: &str) -> StoreResult<usize> {
        Ok(self
            .rows
            .read()
            .keys()
            .filter(|(name, _)| name == dataset)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 2, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn conflicting_rows_are_discarded() {
        let store = MemoryRangeStore::new();
        let first = vec![FrequencySample::new("eso", at(1, 0), 50.01)];
        assert_eq!(store.insert_many(&first).await.unwrap(), 1);

        let again = vec![
            FrequencySample::new("eso", at(1, 0), 49.0),
            FrequencySample::new("eso", at(1, 1), 50.02),
        ];
        assert_eq!(store.insert_many(&again).await.unwrap(), 1);

        let rows = store.query("eso", at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].frequency, 50.01);
    }

    #[tokio::test]
    async fn query_is_half_open_and_per_dataset() {
        let store = MemoryRangeStore::new();
        store
            .insert_many(&[
                FrequencySample::new("eso", at(1, 23), 50.0),
                FrequencySample::new("eso", at(2, 0), 50.0),
                FrequencySample::new("ercot", at(1, 12), 60.0),
            ])
            .await
            .unwrap();

        let rows = store.query("eso", at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, at(1, 23));
        assert_eq!(store.count("ercot").await.unwrap(), 1);
    }
}
