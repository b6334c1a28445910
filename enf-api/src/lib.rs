//! enf-api: the ENF locator service.
//!
//! A client uploads a recording and a date range; a worker extracts the
//! recording's grid hum, compares it with the operator's reference data for
//! that range and reports when the recording was most likely made.
//!
//! ```text
//!  POST /match ──► BlobAdapter.put ──► JobLedger.submit ──► queue
//!                                                            │
//!  GET /match/result/{id} ◄── JobLedger.poll ◄── record ◄── MatchJob (worker)
//!                                                            │
//!                                      RangeCache ◄──────────┘
//!                                        │    │
//!                               RangeStore    ReferenceProvider (ESO)
//! ```

pub mod app;
pub mod http;
pub mod ledger;
pub mod match_job;
pub mod providers;
pub mod settings;
pub mod signal;

pub use app::{build, EnfApp};
pub use ledger::JobLedger;
pub use match_job::{MatchContext, MatchJob};
pub use settings::{MatchSettings, Settings};
