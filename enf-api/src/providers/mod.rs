//! Reference data providers known to the service.

pub mod eso;

use enf_core::ProviderRegistry;

pub use eso::{EsoConfig, EsoProvider};

/// The closed set of datasets this build serves.
pub fn registry(eso: EsoConfig) -> anyhow::Result<ProviderRegistry> {
    Ok(ProviderRegistry::new().with_dataset(EsoProvider::new(eso)?.into_dataset()))
}
