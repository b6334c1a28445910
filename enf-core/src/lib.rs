//! enf-core: shared vocabulary of the ENF locator.
//!
//! Everything the other crates agree on lives here: the structured error
//! taxonomy, the key/value configuration store, the frequency data model and
//! the registry that maps a dataset name to the provider that serves it.

pub mod config;
pub mod errors;
pub mod model;
pub mod provider;

pub use config::{EnfConfig, EnfConfigSnapshot};
pub use errors::{EnfError, EnfResult, ErrorKind};
pub use model::{DateRange, FrequencySample, MatchJobRequest, MatchResult, YearMonth};
pub use provider::{Dataset, ProviderRegistry, ReferenceProvider};
