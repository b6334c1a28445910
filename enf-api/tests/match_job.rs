mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{day, hum_wav, ts, CountingBlobStore, Harness, HumProvider};
use enf_api::match_job::{self, MatchContext};
use enf_api::signal::SubsequenceMatcher;
use enf_core::{DateRange, EnfError, EnfResult, ErrorKind, MatchJobRequest};
use enf_queue::JobPoll;

async fn upload(h: &Harness, wav: Vec<u8>) -> String {
    let receipt = h
        .app
        .state
        .blobs
        .put_bytes("clip.wav", Some("audio/wav"), Bytes::from(wav))
        .await
        .unwrap();
    receipt.id.as_str().to_string()
}

fn request(blob_id: &str, dataset: &str, from: &str, to: &str) -> MatchJobRequest {
    MatchJobRequest::new(
        blob_id,
        dataset,
        DateRange::new(day(from), day(to)).unwrap(),
    )
}

async fn poll_until_ready(h: &Harness, task_id: &str) -> JobPoll {
    for _ in 0..400 {
        let poll = h.app.ledger().poll(task_id).await.unwrap();
        if poll.ready {
            return poll;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {task_id} never finished");
}

struct BrokenMatcher;

impl SubsequenceMatcher for BrokenMatcher {
    fn best_match(&self, _query: &[f64], _reference: &[f64]) -> EnfResult<usize> {
        Err(EnfError::match_failure("matcher refused"))
    }
}

struct PanickingMatcher;

impl SubsequenceMatcher for PanickingMatcher {
    fn best_match(&self, _query: &[f64], _reference: &[f64]) -> EnfResult<usize> {
        panic!("matcher blew up")
    }
}

#[tokio::test]
async fn locates_recording_and_deletes_upload() {
    let h = Harness::new(HumProvider::new(300)).await;
    let blob_id = upload(&h, hum_wav(120, 30, 2)).await;

    let result = match_job::run(
        &request(&blob_id, "eso", "2023-02-01", "2023-02-01"),
        &h.app.context,
    )
    .await
    .unwrap();

    assert_eq!(result.match_time, ts("2023-02-01 00:02:00"));
    assert_eq!(result.query_series.len(), 30);
    assert!(result.query_series.iter().all(|f| (f - 50.0).abs() < 0.1));
    assert_eq!(h.blobs.deletes(), 1);
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn provider_failure_still_deletes_upload() {
    let h = Harness::new(HumProvider::failing()).await;
    let blob_id = upload(&h, hum_wav(0, 5, 2)).await;

    let err = match_job::run(
        &request(&blob_id, "eso", "2023-02-01", "2023-02-02"),
        &h.app.context,
    )
    .await
    .unwrap_err();

    assert!(err.is(ErrorKind::ProviderFailure));
    assert_eq!(h.blobs.deletes(), 1);
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn matcher_failure_still_deletes_upload() {
    let h = Harness::new(HumProvider::new(60)).await;
    let blob_id = upload(&h, hum_wav(0, 10, 2)).await;
    let ctx = h.app.context.clone().with_matcher(Arc::new(BrokenMatcher));

    let err = match_job::run(&request(&blob_id, "eso", "2023-02-01", "2023-02-01"), &ctx)
        .await
        .unwrap_err();

    assert!(err.is(ErrorKind::MatchFailure));
    assert_eq!(err.message, "matcher refused");
    assert_eq!(h.blobs.deletes(), 1);
}

#[tokio::test]
async fn download_failure_still_deletes_upload() {
    let blobs = CountingBlobStore {
        fail_get: true,
        ..Default::default()
    };
    let h = Harness::with_blobs(HumProvider::new(60), blobs).await;
    let blob_id = upload(&h, hum_wav(0, 5, 2)).await;

    let err = match_job::run(
        &request(&blob_id, "eso", "2023-02-01", "2023-02-01"),
        &h.app.context,
    )
    .await
    .unwrap_err();

    assert!(err.is(ErrorKind::BlobAccessFailure));
    assert_eq!(h.blobs.deletes(), 1);
}

#[tokio::test]
async fn unknown_dataset_fails_without_touching_providers() {
    let h = Harness::new(HumProvider::new(60)).await;
    let blob_id = upload(&h, hum_wav(0, 5, 2)).await;

    let err = match_job::run(
        &request(&blob_id, "nope", "2023-02-01", "2023-02-01"),
        &h.app.context,
    )
    .await
    .unwrap_err();

    assert!(err.is(ErrorKind::UnknownDataset));
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.blobs.deletes(), 1);
}

#[tokio::test]
async fn empty_reference_is_a_match_failure() {
    let h = Harness::new(HumProvider::new(0)).await;
    let blob_id = upload(&h, hum_wav(0, 5, 2)).await;

    let err = match_job::run(
        &request(&blob_id, "eso", "2023-02-01", "2023-02-03"),
        &h.app.context,
    )
    .await
    .unwrap_err();

    assert!(err.is(ErrorKind::MatchFailure));
    assert!(err.message.contains("No reference data"));
    assert_eq!(h.blobs.deletes(), 1);
}

#[tokio::test]
async fn panic_in_matcher_deletes_upload_then_propagates() {
    let h = Harness::new(HumProvider::new(60)).await;
    let blob_id = upload(&h, hum_wav(0, 10, 2)).await;
    let ctx: MatchContext = h.app.context.clone().with_matcher(Arc::new(PanickingMatcher));
    let req = request(&blob_id, "eso", "2023-02-01", "2023-02-01");

    let joined = tokio::spawn(async move { match_job::run(&req, &ctx).await }).await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(h.blobs.deletes(), 1);
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn ledger_runs_submitted_jobs_on_workers() {
    let h = Harness::new(HumProvider::new(300)).await;
    let workers = h
        .app
        .ledger()
        .start_workers(h.app.context.clone())
        .await
        .unwrap();

    let good = upload(&h, hum_wav(60, 30, 2)).await;
    let bad = upload(&h, hum_wav(0, 5, 2)).await;
    let ok_id = h
        .app
        .ledger()
        .submit(request(&good, "eso", "2023-01-10", "2023-01-10"), None)
        .await
        .unwrap();
    let err_id = h
        .app
        .ledger()
        .submit(request(&bad, "missing", "2023-01-10", "2023-01-10"), Some("req-7".into()))
        .await
        .unwrap();

    let ok = poll_until_ready(&h, ok_id.as_str()).await;
    assert_eq!(ok.successful, Some(true));
    let value = ok.value.clone().unwrap();
    assert_eq!(value["match_time"], "2023-01-10 00:01:00");
    assert_eq!(value["query_series"].as_array().unwrap().len(), 30);

    let failed = poll_until_ready(&h, err_id.as_str()).await;
    assert_eq!(failed.successful, Some(false));
    assert!(failed.value.unwrap().as_str().unwrap().contains("missing"));

    // Terminal results are stable.
    assert_eq!(h.app.ledger().poll(ok_id.as_str()).await.unwrap(), ok);
    assert_eq!(h.blobs.deletes(), 2);
    assert!(h.blobs.inner.is_empty());

    workers.shutdown().await.unwrap();
}

#[tokio::test]
async fn polling_an_unknown_id_is_not_an_error() {
    let h = Harness::new(HumProvider::new(60)).await;
    let poll = h.app.ledger().poll("no-such-task").await.unwrap();
    assert_eq!(poll, JobPoll::not_ready());
}
