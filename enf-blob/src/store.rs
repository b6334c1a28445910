use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobResult, ByteStream};

/// Core blob storage operations - must be implemented by all storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob from a stream
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        stream: ByteStream,
    ) -> BlobResult<PutResult>;

    /// Whole blob content; `NotFound` when the key is absent
    async fn get(&self, key: &str) -> BlobResult<Bytes>;

    /// Delete a blob. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: Option<String>,
    pub size_bytes: u64,
}
