//! Assembles the service from [`Settings`].

use std::sync::Arc;

use anyhow::Context;
use enf_blob::{BlobAdapter, MemoryBlobStore, S3CompatibleStore};
use enf_core::ProviderRegistry;
use enf_queue::{MemoryBackend, QueueAdapter, QueueBackend, SqliteBackend};
use enf_store::{RangeCache, RangeStore, SqliteRangeStore};
use tracing::info;

use crate::http::AppState;
use crate::ledger::JobLedger;
use crate::match_job::MatchContext;
use crate::providers;
use crate::settings::{BlobBackend, QueueBackendKind, Settings};

/// Shared handles for the HTTP surface and the worker pool.
#[derive(Clone)]
pub struct EnfApp {
    pub state: AppState,
    pub context: MatchContext,
}

impl EnfApp {
    /// Build over already-constructed parts; used by tests and by [`build`].
    pub async fn from_parts(
        registry: ProviderRegistry,
        store: Arc<dyn RangeStore>,
        blobs: BlobAdapter,
        queue: QueueAdapter,
        settings: &Settings,
    ) -> anyhow::Result<Self> {
        let cache = Arc::new(RangeCache::new(store, Arc::new(registry)));
        let ledger = JobLedger::new(queue).await?;
        let context =
            MatchContext::new(Arc::clone(&cache), blobs.clone()).with_settings(settings.matching);

        Ok(Self {
            state: AppState {
                ledger,
                blobs,
                cache,
            },
            context,
        })
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.state.ledger
    }
}

pub async fn build(settings: &Settings) -> anyhow::Result<EnfApp> {
    let store = SqliteRangeStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("opening {}", settings.database_url))?;

    let backend: Arc<dyn QueueBackend> = match settings.queue_backend {
        QueueBackendKind::Memory => Arc::new(MemoryBackend::new()),
        QueueBackendKind::Sqlite => Arc::new(SqliteBackend::from_pool(store.pool().clone()).await?),
    };
    let queue = QueueAdapter::from_arc(backend).with_config(settings.queue.clone());

    let blobs = match settings.blob_backend {
        BlobBackend::Memory => BlobAdapter::new(MemoryBlobStore::new(), settings.blob.clone()),
        BlobBackend::S3 => {
            let s3 = S3CompatibleStore::connect(settings.s3.clone())
                .await
                .context("connecting to blob storage")?;
            BlobAdapter::new(s3, settings.blob.clone())
        }
    };

    let registry = providers::registry(settings.eso.clone())?;
    info!(
        datasets = ?registry.names(),
        queue = ?settings.queue_backend,
        blobs = ?settings.blob_backend,
        "service assembled"
    );

    EnfApp::from_parts(registry, Arc::new(store), blobs, queue, settings).await
}

/// A worker process shares nothing in memory with the HTTP process.
pub fn check_standalone_worker(settings: &Settings) -> anyhow::Result<()> {
    if settings.queue_backend != QueueBackendKind::Sqlite {
        anyhow::bail!("worker mode needs a shared queue: set ENF__QUEUE__BACKEND=sqlite");
    }
    if settings.blob_backend != BlobBackend::S3 {
        anyhow::bail!("worker mode needs shared upload storage: set ENF__BLOB__BACKEND=s3");
    }
    Ok(())
}
