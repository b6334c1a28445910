use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::PathRejection,
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{HeaderMap, Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::NaiveDateTime;
use enf_blob::BlobAdapter;
use enf_core::{DateRange, EnfError, MatchJobRequest, YearMonth};
use enf_queue::JobPoll;
use enf_store::RangeCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, warn};

use crate::http::ApiError;
use crate::ledger::JobLedger;

const REQUEST_ID_HEADER: &str = "x-request-id";
const UPLOAD_FIELD: &str = "file";
/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ledger: JobLedger,
    pub blobs: BlobAdapter,
    pub cache: Arc<RangeCache>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.blobs.config().max_blob_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(banner))
        .route("/health", get(|| async { "ok" }))
        .route(
            "/match",
            post(submit_match).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/match/result/{task_id}", get(match_result))
        .route("/datasets", get(list_datasets))
        .route("/datasets/{name}", get(dataset_range))
        .route("/datasets/{name}/months", get(dataset_months))
        .route("/datasets/{name}/{year}/{month}", get(dataset_month))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    let request_id = req
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    info_span!("http", method = %req.method(), uri = %req.uri(), request_id)
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn banner() -> &'static str {
    "ENF locator API"
}

#[derive(Debug, Deserialize)]
struct MatchQuery {
    db: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Serialize)]
struct SamplePoint {
    timestamp: NaiveDateTime,
    frequency: f64,
}

struct Upload {
    filename: String,
    content_type: Option<String>,
    data: Bytes,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn upload_error(err: MultipartError) -> EnfError {
    EnfError::invalid_request(format!("Could not read upload: {}", err.body_text()))
}

/// First `file` field. The extension is checked before the body is read.
async fn read_upload(multipart: &mut Multipart, blobs: &BlobAdapter) -> Result<Upload, EnfError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(EnfError::invalid_request("No selected file"));
        }
        if !blobs.config().accepts(&filename) {
            return Err(EnfError::invalid_request(format!(
                "File type not allowed: '{filename}'"
            ))
            .with_data(json!({ "allowed": blobs.config().allowed_extensions })));
        }

        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(upload_error)?;
        return Ok(Upload {
            filename,
            content_type,
            data,
        });
    }
    Err(EnfError::invalid_request("No file part"))
}

async fn submit_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MatchQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(db), Some(from)) = (present(query.db), present(query.from)) else {
        return Err(EnfError::invalid_request("Missing required query parameters: db, from").into());
    };
    let range = DateRange::parse(&from, query.to.as_deref())?;

    let mut multipart = multipart
        .map_err(|e| EnfError::invalid_request(format!("Expected a multipart upload: {e}")))?;
    let upload = read_upload(&mut multipart, &state.blobs).await?;

    let receipt = state
        .blobs
        .put_bytes(&upload.filename, upload.content_type.as_deref(), upload.data)
        .await?;

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request = MatchJobRequest::new(receipt.id.as_str(), db, range);

    match state.ledger.submit(request, request_id).await {
        Ok(job_id) => Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": job_id })))),
        Err(err) => {
            // Nobody will ever process this upload.
            if let Err(cleanup) = state.blobs.delete(&receipt.id).await {
                warn!(blob_id = %receipt.id, error = %cleanup, "failed to delete orphaned upload");
            }
            Err(err.into())
        }
    }
}

async fn match_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<JobPoll>, ApiError> {
    Ok(Json(state.ledger.poll(&task_id).await?))
}

async fn list_datasets(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "datasets": state.cache.registry().names() }))
}

async fn dataset_range(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<SamplePoint>>, ApiError> {
    let dataset = state.cache.registry().resolve(&name)?;
    let Some(from) = present(query.from) else {
        return Err(EnfError::invalid_request("Missing required query parameter: from").into());
    };
    let range = DateRange::parse(&from, query.to.as_deref())?;

    let samples = state.cache.get_for(dataset, range).await?;
    Ok(Json(
        samples
            .into_iter()
            .map(|s| SamplePoint {
                timestamp: s.timestamp,
                frequency: s.frequency,
            })
            .collect(),
    ))
}

async fn dataset_months(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dataset = state.cache.registry().resolve(&name)?;
    let months = dataset.provider.catalogue().await.map_err(|e| {
        EnfError::provider_failure(format!("Could not list months for '{name}': {e}"))
            .with_source(e)
    })?;

    let months: Vec<String> = months.iter().map(ToString::to_string).collect();
    Ok(Json(json!({ "months": months })))
}

async fn dataset_month(
    State(state): State<AppState>,
    path: Result<Path<(String, i32, u32)>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path((name, year, month)) =
        path.map_err(|e| EnfError::invalid_request(format!("Invalid month path: {e}")))?;
    let dataset = state.cache.registry().resolve(&name)?;
    let range = DateRange::month(YearMonth::new(year, month)?)?;

    let samples = state.cache.get_for(dataset, range).await?;
    let times: Vec<String> = samples
        .iter()
        .map(|s| s.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
        .collect();
    let enf: Vec<f64> = samples.iter().map(|s| s.frequency).collect();
    Ok(Json(json!({ "times": times, "enf": enf })))
}
