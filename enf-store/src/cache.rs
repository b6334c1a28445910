//! # Gap-filling range cache
//!
//! `get` returns every reference sample of a dataset inside an inclusive date
//! range, asking the provider only for the dates the store cannot answer:
//!
//! 1. read whatever the store holds for the range
//! 2. compute the deficit: requested dates with no cached sample
//! 3. one provider call with every missing date
//! 4. persist the new samples (conflicts ignored)
//! 5. read the range back, so rows another caller stored first win over ours
//! 6. merge stored and fetched, ascending by timestamp, no duplicates
//!
//! Dates the provider has nothing for are not remembered as empty and will be
//! asked for again next time.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use enf_core::{DateRange, Dataset, EnfError, EnfResult, FrequencySample, ProviderRegistry};
use tracing::{debug, info, instrument, warn};

use crate::RangeStore;

#[derive(Clone)]
pub struct RangeCache {
    store: Arc<dyn RangeStore>,
    registry: Arc<ProviderRegistry>,
}

impl RangeCache {
    pub fn new(store: Arc<dyn RangeStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RangeStore> {
        &self.store
    }

    /// Resolve `dataset` by name and fill `range`.
    pub async fn get(&self, dataset: &str, range: DateRange) -> EnfResult<Vec<FrequencySample>> {
        let dataset = self.registry.resolve(dataset)?;
        self.get_for(dataset, range).await
    }

    #[instrument(skip(self, dataset), fields(dataset = %dataset.name, range = %range))]
    pub async fn get_for(
        &self,
        dataset: &Dataset,
        range: DateRange,
    ) -> EnfResult<Vec<FrequencySample>> {
        let cached = self.read_cached(&dataset.name, &range).await?;
        let missing = deficit(&range, &cached);

        if missing.is_empty() {
            debug!(cached = cached.len(), "range fully cached");
            return Ok(merge(cached, Vec::new()));
        }

        info!(
            cached = cached.len(),
            missing_days = missing.len(),
            "fetching missing dates from provider"
        );
        let fetched = self.fetch_deficit(dataset, &missing).await?;
        let inserted = self.persist(&fetched).await?;
        if inserted == fetched.len() {
            return Ok(merge(cached, fetched));
        }
        let stored = self.read_cached(&dataset.name, &range).await?;
        debug!(
            conflicts = fetched.len() - inserted,
            "concurrent fill; returning stored rows"
        );
        Ok(merge(stored, fetched))
    }

    async fn read_cached(&self, dataset: &str, range: &DateRange) -> EnfResult<Vec<FrequencySample>> {
        Ok(self
            .store
            .query(dataset, range.start(), range.end_exclusive())
            .await?)
    }

    /// One provider call. Samples outside the asked-for dates are dropped.
    async fn fetch_deficit(
        &self,
        dataset: &Dataset,
        missing: &BTreeSet<NaiveDate>,
    ) -> EnfResult<Vec<FrequencySample>> {
        let samples = dataset.query_dates(missing).await.map_err(|e| {
            warn!(error = %e, "reference provider failed");
            EnfError::provider_failure(format!(
                "Reference provider for '{}' failed: {e}",
                dataset.name
            ))
            .with_source(e)
        })?;

        let offered = samples.len();
        let kept: Vec<FrequencySample> = samples
            .into_iter()
            .filter(|s| missing.contains(&s.date()))
            .map(|mut s| {
                s.dataset.clone_from(&dataset.name);
                s
            })
            .collect();
        if kept.len() < offered {
            debug!(dropped = offered - kept.len(), "provider returned samples outside the deficit");
        }
        Ok(kept)
    }

    async fn persist(&self, samples: &[FrequencySample]) -> EnfResult<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let inserted = self.store.insert_many(samples).await?;
        debug!(offered = samples.len(), inserted, "cache filled");
        Ok(inserted)
    }
}

/// Dates in `range` with no sample in `cached`.
pub fn deficit(range: &DateRange, cached: &[FrequencySample]) -> BTreeSet<NaiveDate> {
    let present: BTreeSet<NaiveDate> = cached.iter().map(FrequencySample::date).collect();
    range.dates().difference(&present).copied().collect()
}

/// Ascending by timestamp with one sample per timestamp; cached rows win.
pub fn merge(cached: Vec<FrequencySample>, fetched: Vec<FrequencySample>) -> Vec<FrequencySample> {
    let mut all = cached;
    all.extend(fetched);
    // Stable sort keeps cached rows ahead of fetched ones on equal timestamps.
    all.sort_by_key(|s| s.timestamp);
    all.dedup_by_key(|s| s.timestamp);
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, d).unwrap()
    }

    fn sample(d: u32, sec: u32, f: f64) -> FrequencySample {
        FrequencySample::new("eso", day(d).and_hms_opt(0, 0, sec).unwrap(), f)
    }

    #[test]
    fn deficit_is_requested_minus_present() {
        let range = DateRange::new(day(1), day(4)).unwrap();
        let cached = vec![sample(1, 0, 50.0), sample(1, 1, 50.0), sample(3, 0, 50.0)];
        let missing: Vec<_> = deficit(&range, &cached).into_iter().collect();
        assert_eq!(missing, vec![day(2), day(4)]);
    }

    #[test]
    fn merge_sorts_and_prefers_cached() {
        let cached = vec![sample(2, 0, 50.0)];
        let fetched = vec![sample(3, 0, 49.9), sample(2, 0, 1.0), sample(1, 0, 50.1)];
        let merged = merge(cached, fetched);
        let stamps: Vec<_> = merged.iter().map(|s| s.date()).collect();
        assert_eq!(stamps, vec![day(1), day(2), day(3)]);
        assert_eq!(merged[1].frequency, 50.0);
    }
}
