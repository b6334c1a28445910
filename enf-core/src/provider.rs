//! Dataset registry.
//!
//! A dataset is a name, the nominal line frequency of its grid and the
//! provider that knows how to fetch it. The registry is assembled once at
//! startup and only read afterwards; share it behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::{EnfError, EnfResult};
use crate::model::{FrequencySample, YearMonth};

/// Upstream source of reference frequency data.
#[async_trait]
pub trait ReferenceProvider: Send + Sync {
    /// Fetch samples for exactly the requested dates.
    ///
    /// Called once per cache miss with every missing date. No guarantee is
    /// made about how many samples a day yields; a date may yield none.
    async fn query_dates(
        &self,
        dataset: &str,
        dates: &BTreeSet<NaiveDate>,
    ) -> anyhow::Result<Vec<FrequencySample>>;

    /// Months the provider publishes, oldest first.
    async fn catalogue(&self) -> anyhow::Result<Vec<YearMonth>> {
        Ok(Vec::new())
    }
}

/// Registered dataset descriptor.
#[derive(Clone)]
pub struct Dataset {
    pub name: String,
    /// Nominal line frequency in Hz (50 or 60).
    pub nominal_frequency: f64,
    pub provider: Arc<dyn ReferenceProvider>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("nominal_frequency", &self.nominal_frequency)
            .finish_non_exhaustive()
    }
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        nominal_frequency: f64,
        provider: Arc<dyn ReferenceProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            nominal_frequency,
            provider,
        }
    }

    pub async fn query_dates(
        &self,
        dates: &BTreeSet<NaiveDate>,
    ) -> anyhow::Result<Vec<FrequencySample>> {
        self.provider.query_dates(&self.name, dates).await
    }
}

/// Closed name -> dataset mapping.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    datasets: BTreeMap<String, Dataset>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration; later registrations replace earlier ones.
    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.insert(dataset.name.clone(), dataset);
        self
    }

    pub fn resolve(&self, name: &str) -> EnfResult<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| EnfError::unknown_dataset(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }
}
