use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::{BlobConfig, BlobError, BlobId, BlobReceipt, BlobResult, BlobStore, ByteStream};

/// Upload-facing wrapper around a [`BlobStore`]; cheap to clone and share.
#[derive(Clone)]
pub struct BlobAdapter {
    store: Arc<dyn BlobStore>,
    config: BlobConfig,
}

impl BlobAdapter {
    pub fn new<S: BlobStore + 'static>(store: S, config: BlobConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    pub fn from_arc(store: Arc<dyn BlobStore>, config: BlobConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Store a client upload under a fresh [`BlobId`].
    ///
    /// Rejects disallowed extensions before reading the body and oversized
    /// bodies after; an oversized upload is removed again.
    #[instrument(skip(self, body), fields(filename = %filename))]
    pub async fn put_upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        body: ByteStream,
    ) -> BlobResult<BlobReceipt> {
        if !self.config.accepts(filename) {
            return Err(BlobError::invalid(format!(
                "Unsupported file type: '{filename}' (allowed: {})",
                self.config.allowed_extensions.join(", ")
            )));
        }

        let id = BlobId::for_upload(filename);
        let key = id.object_key();
        let result = self.store.put(&key, content_type, body).await?;

        if result.size_bytes > self.config.max_blob_bytes {
            if let Err(err) = self.store.delete(&key).await {
                warn!(%key, error = %err, "failed to remove oversized upload");
            }
            return Err(BlobError::TooLarge {
                size: result.size_bytes,
                max: self.config.max_blob_bytes,
            });
        }

        debug!(blob_id = %id, size_bytes = result.size_bytes, "upload stored");
        Ok(BlobReceipt {
            id,
            key,
            size_bytes: result.size_bytes,
            content_type: content_type.map(str::to_string),
            filename: filename.to_string(),
        })
    }

    /// Same as [`put_upload`](Self::put_upload) for an in-memory body.
    pub async fn put_bytes(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> BlobResult<BlobReceipt> {
        let stream = futures::stream::once(async move { Ok(data) });
        self.put_upload(filename, content_type, Box::pin(stream)).await
    }

    pub async fn get(&self, id: &BlobId) -> BlobResult<Bytes> {
        self.store.get(&id.object_key()).await
    }

    /// Idempotent: deleting a missing blob succeeds.
    pub async fn delete(&self, id: &BlobId) -> BlobResult<()> {
        match self.store.delete(&id.object_key()).await {
            Err(BlobError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobStore;

    fn adapter(store: MemoryBlobStore) -> BlobAdapter {
        BlobAdapter::new(store, BlobConfig::default().with_max_blob_bytes(16))
    }

    #[tokio::test]
    async fn upload_round_trip_and_idempotent_delete() {
        let store = MemoryBlobStore::new();
        let blobs = adapter(store.clone());

        let receipt = blobs
            .put_bytes("hum.wav", Some("audio/wav"), Bytes::from_static(b"RIFF0000"))
            .await
            .unwrap();
        assert_eq!(receipt.size_bytes, 8);
        assert!(store.contains(&receipt.key));
        assert_eq!(receipt.key, format!("uploads/{}", receipt.id));

        assert_eq!(&blobs.get(&receipt.id).await.unwrap()[..], b"RIFF0000");

        blobs.delete(&receipt.id).await.unwrap();
        blobs.delete(&receipt.id).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            blobs.get(&receipt.id).await,
            Err(BlobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_extension_never_reaches_the_store() {
        let store = MemoryBlobStore::new();
        let err = adapter(store.clone())
            .put_bytes("song.mp3", None, Bytes::from_static(b"ID3"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let store = MemoryBlobStore::new();
        let err = adapter(store.clone())
            .put_bytes("big.wav", None, Bytes::from(vec![0u8; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { size: 32, max: 16 }));
        assert!(store.is_empty());
    }
}
