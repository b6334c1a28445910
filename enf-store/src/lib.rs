//! # enf-store: reference data persistence
//!
//! Two layers:
//!
//! ```text
//! ┌─────────────────┐
//! │   RangeCache    │  ← read cache → deficit → fetch → persist → merge
//! ├─────────────────┤
//! │   RangeStore    │  ← range scans + conflict-tolerant batch inserts
//! └─────────────────┘
//! ```
//!
//! `RangeStore` is an injected handle (`Arc<dyn RangeStore>`) so workers can
//! share one pool and tests can substitute the in-memory store.

pub mod cache;
mod error;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use cache::RangeCache;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryRangeStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRangeStore;
pub use store::RangeStore;
