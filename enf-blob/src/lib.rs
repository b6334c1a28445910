//! # enf-blob: upload storage
//!
//! Uploaded recordings are parked in a blob store between the HTTP request
//! that receives them and the worker that analyses them. The worker deletes
//! the blob when it is done, whatever the outcome.
//!
//! ```text
//! ┌─────────────────┐
//! │   BlobAdapter   │  ← naming, size and extension checks
//! ├─────────────────┤
//! │   BlobStore     │  ← put / get / delete primitives
//! └─────────────────┘
//! ```
//!
//! ```rust
//! use enf_blob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let blobs = BlobAdapter::new(MemoryBlobStore::new(), BlobConfig::default());
//!
//! let body = futures::stream::once(async { Ok(bytes::Bytes::from_static(b"RIFF")) });
//! let receipt = blobs.put_upload("rec.wav", Some("audio/wav"), Box::pin(body)).await?;
//!
//! let audio = blobs.get(&receipt.id).await?;
//! assert_eq!(&audio[..], b"RIFF");
//!
//! blobs.delete(&receipt.id).await?;
//! blobs.delete(&receipt.id).await?; // already gone, still Ok
//! # Ok(())
//! # }
//! ```

pub mod adapter;
mod config;
mod error;
pub mod memory;
mod s3_store;
pub mod store;
mod types;

pub use adapter::BlobAdapter;
pub use config::BlobConfig;
pub use error::{BlobError, BlobResult};
pub use memory::MemoryBlobStore;
pub use s3_store::{S3CompatibleStore, S3Config};
pub use store::{BlobStore, PutResult};
pub use types::{sanitize_filename, BlobId, BlobReceipt, ByteStream};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobAdapter, BlobConfig, BlobError, BlobId, BlobReceipt, BlobResult, BlobStore,
        ByteStream, MemoryBlobStore,
    };
}
