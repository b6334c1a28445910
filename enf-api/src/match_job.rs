//! The background unit of work: locate one uploaded recording in time.
//!
//! Whatever happens while matching (unknown dataset, provider outage,
//! unreadable audio, a panic in the matcher) the uploaded blob is deleted
//! exactly once before the job finishes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use enf_blob::{BlobAdapter, BlobId};
use enf_core::{EnfError, EnfResult, MatchJobRequest, MatchResult};
use enf_queue::{Job, JobError};
use enf_store::RangeCache;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::settings::MatchSettings;
use crate::signal::{
    decode_wav, EnfExtractor, ExtractionBand, SpectralPeakExtractor, SubsequenceMatcher,
    ZNormalizedMatcher,
};

/// Everything a worker needs to run a [`MatchJob`]; handed to the worker
/// pool once and cloned per job.
#[derive(Clone)]
pub struct MatchContext {
    pub cache: Arc<RangeCache>,
    pub blobs: BlobAdapter,
    pub extractor: Arc<dyn EnfExtractor>,
    pub matcher: Arc<dyn SubsequenceMatcher>,
    pub settings: MatchSettings,
}

impl MatchContext {
    pub fn new(cache: Arc<RangeCache>, blobs: BlobAdapter) -> Self {
        Self {
            cache,
            blobs,
            extractor: Arc::new(SpectralPeakExtractor::default()),
            matcher: Arc::new(ZNormalizedMatcher),
            settings: MatchSettings::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EnfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn SubsequenceMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_settings(mut self, settings: MatchSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchJob {
    pub request: MatchJobRequest,
}

impl MatchJob {
    pub fn new(request: MatchJobRequest) -> Self {
        Self { request }
    }
}

#[async_trait]
impl Job for MatchJob {
    type Context = MatchContext;
    type Result = MatchResult;

    const JOB_TYPE: &'static str = "enf_match";

    async fn execute(&self, ctx: MatchContext) -> Result<MatchResult, JobError> {
        run(&self.request, &ctx)
            .await
            .map_err(|e| JobError::failed(e.message))
    }
}

/// Match the recording, then delete it. A panic inside the match is
/// resumed only after the blob is gone.
pub async fn run(request: &MatchJobRequest, ctx: &MatchContext) -> EnfResult<MatchResult> {
    let blob_id = BlobId::from(request.blob_id.as_str());

    let outcome = AssertUnwindSafe(locate(request, &blob_id, ctx))
        .catch_unwind()
        .await;

    match ctx.blobs.delete(&blob_id).await {
        Ok(()) => debug!(%blob_id, "upload deleted"),
        Err(err) => warn!(%blob_id, error = %err, "failed to delete upload"),
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn locate(
    request: &MatchJobRequest,
    blob_id: &BlobId,
    ctx: &MatchContext,
) -> EnfResult<MatchResult> {
    let dataset = ctx.cache.registry().resolve(&request.dataset)?;
    let range = request.range()?;

    let reference = ctx.cache.get_for(dataset, range).await?;
    if reference.is_empty() {
        return Err(EnfError::match_failure(format!(
            "No reference data for '{}' between {} and {}",
            dataset.name,
            range.from(),
            range.to()
        )));
    }

    let audio = ctx.blobs.get(blob_id).await?;
    let recording = decode_wav(&audio)?;
    debug!(
        sample_rate = recording.sample_rate,
        seconds = recording.duration_secs(),
        "recording decoded"
    );

    let frequencies: Vec<f64> = reference.iter().map(|s| s.frequency).collect();
    let band = ExtractionBand::from_reference(
        dataset.nominal_frequency,
        ctx.settings.harmonic,
        &frequencies,
    )?;

    let extractor = Arc::clone(&ctx.extractor);
    let matcher = Arc::clone(&ctx.matcher);
    let target_rate = ctx.settings.target_rate;
    let (query_series, index) = tokio::task::spawn_blocking(move || {
        let query = extractor.extract(&recording, &band, target_rate)?;
        let index = matcher.best_match(&query, &frequencies)?;
        Ok::<_, EnfError>((query, index))
    })
    .await
    .map_err(|e| {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        }
        EnfError::internal(format!("Matching task did not complete: {e}"))
    })??;

    let matched = reference.get(index).ok_or_else(|| {
        EnfError::match_failure(format!(
            "Matcher returned index {index} outside the reference series ({} samples)",
            reference.len()
        ))
    })?;

    info!(
        dataset = %dataset.name,
        match_time = %matched.timestamp,
        query_len = query_series.len(),
        "recording located"
    );
    Ok(MatchResult {
        match_time: matched.timestamp,
        query_series,
    })
}
