mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{hum_wav, Harness, HumProvider};
use enf_api::http::router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "enf-test-boundary";

async fn json_body(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(res: Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn app(h: &Harness) -> Router {
    router(h.app.state.clone())
}

/// multipart/form-data with one part named `field`.
fn multipart(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_match(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn banner_and_health() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h).oneshot(get("/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(text_body(res).await, "ENF locator API");

    let res = app(&h).oneshot(get("/health")).await.unwrap();
    assert_eq!(text_body(res).await, "ok");
}

#[tokio::test]
async fn submit_accepts_wav_and_returns_task_id() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-02-01&to=2023-02-02",
            multipart("file", "clip.wav", &hum_wav(0, 2, 2)),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert!(res.headers().contains_key("x-request-id"));
    let body = json_body(res).await;
    assert!(!body["task_id"].as_str().unwrap().is_empty());

    assert_eq!(h.blobs.inner.len(), 1);
    assert_eq!(h.app.ledger().queue().metrics().jobs_enqueued(), 1);
}

#[tokio::test]
async fn disallowed_extension_is_rejected_before_storing() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-02-01",
            multipart("file", "clip.mp3", b"ID3 not a wav"),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["name"], "InvalidRequest");
    assert_eq!(body["message"], "File type not allowed: 'clip.mp3'");
    assert!(body["data"]["allowed"].as_array().unwrap().contains(&json!("wav")));

    assert!(h.blobs.inner.is_empty());
    assert_eq!(h.app.ledger().queue().metrics().jobs_enqueued(), 0);
}

#[tokio::test]
async fn submit_requires_db_and_from() {
    let h = Harness::new(HumProvider::new(10)).await;

    for uri in ["/match?from=2023-02-01", "/match?db=eso", "/match?db=&from=2023-02-01"] {
        let res = app(&h)
            .oneshot(post_match(uri, multipart("file", "clip.wav", b"RIFF")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(res).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Missing required query parameters"));
    }
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn submit_rejects_a_non_multipart_body() {
    let h = Harness::new(HumProvider::new(10)).await;

    let req = Request::builder()
        .method("POST")
        .uri("/match?db=eso&from=2023-02-01")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"file":"clip.wav"}"#))
        .unwrap();
    let res = app(&h).oneshot(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["name"], "InvalidRequest");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Expected a multipart upload"));
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn submit_requires_a_named_file() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-02-01",
            multipart("audio", "clip.wav", b"RIFF"),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(res).await["message"], "No file part");

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-02-01",
            multipart("file", "", b"RIFF"),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(res).await["message"], "No selected file");
}

#[tokio::test]
async fn submit_rejects_reversed_range() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-02-05&to=2023-02-01",
            multipart("file", "clip.wav", b"RIFF"),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(res).await["message"]
        .as_str()
        .unwrap()
        .contains("Invalid date range"));
    assert!(h.blobs.inner.is_empty());
}

#[tokio::test]
async fn unknown_task_reads_as_not_ready() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h)
        .oneshot(get("/match/result/does-not-exist"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        json_body(res).await,
        json!({ "ready": false, "successful": null, "value": null })
    );
}

#[tokio::test]
async fn lists_datasets() {
    let h = Harness::new(HumProvider::new(10)).await;

    let res = app(&h).oneshot(get("/datasets")).await.unwrap();
    assert_eq!(json_body(res).await, json!({ "datasets": ["eso"] }));
}

#[tokio::test]
async fn dataset_range_is_sorted_and_cached() {
    let h = Harness::new(HumProvider::new(3)).await;
    let uri = "/datasets/eso?from=2023-01-01&to=2023-01-02";

    let res = app(&h).oneshot(get(uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let points = json_body(res).await;
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 6);
    assert_eq!(points[0]["timestamp"], "2023-01-01T00:00:00");
    assert_eq!(points[5]["timestamp"], "2023-01-02T00:00:02");
    let stamps: Vec<&str> = points
        .iter()
        .map(|p| p["timestamp"].as_str().unwrap())
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);

    let res = app(&h).oneshot(get(uri)).await.unwrap();
    assert_eq!(json_body(res).await.as_array().unwrap().len(), 6);
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.store.len(), 6);
}

#[tokio::test]
async fn dataset_range_errors() {
    let h = Harness::new(HumProvider::new(3)).await;

    let res = app(&h)
        .oneshot(get("/datasets/nope?from=2023-01-01"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = json_body(res).await;
    assert_eq!(body["name"], "UnknownDataset");
    assert_eq!(body["data"]["dataset"], "nope");

    let res = app(&h)
        .oneshot(get("/datasets/eso?from=2023-01-05&to=2023-01-01"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app(&h).oneshot(get("/datasets/eso")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app(&h)
        .oneshot(get("/datasets/eso?from=yesterday"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn provider_outage_is_a_bad_gateway() {
    let h = Harness::new(HumProvider::failing()).await;

    let res = app(&h)
        .oneshot(get("/datasets/eso?from=2023-01-01"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(res).await["name"], "ProviderFailure");
}

#[tokio::test]
async fn dataset_months_and_month_series() {
    let h = Harness::new(HumProvider::new(2)).await;

    let res = app(&h).oneshot(get("/datasets/eso/months")).await.unwrap();
    assert_eq!(
        json_body(res).await,
        json!({ "months": ["2023-01", "2023-02"] })
    );

    let res = app(&h).oneshot(get("/datasets/eso/2023/2")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    let times = body["times"].as_array().unwrap();
    let enf = body["enf"].as_array().unwrap();
    assert_eq!(times.len(), 28 * 2);
    assert_eq!(enf.len(), times.len());
    assert_eq!(times[0], "2023-02-01 00:00:00");
    assert_eq!(times[55], "2023-02-28 00:00:01");
}

#[tokio::test]
async fn invalid_month_paths_are_bad_requests() {
    let h = Harness::new(HumProvider::new(2)).await;

    for uri in ["/datasets/eso/2023/13", "/datasets/eso/2023/0", "/datasets/eso/2023/feb"] {
        let res = app(&h).oneshot(get(uri)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
    }

    let res = app(&h).oneshot(get("/datasets/nope/2023/2")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn request_id_is_preserved() {
    let h = Harness::new(HumProvider::new(2)).await;

    let res = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-me-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers()["x-request-id"], "trace-me-123");
}

#[tokio::test]
async fn submitted_recording_is_located_and_deleted() {
    let h = Harness::new(HumProvider::new(240)).await;
    let workers = h
        .app
        .ledger()
        .start_workers(h.app.context.clone())
        .await
        .unwrap();

    let res = app(&h)
        .oneshot(post_match(
            "/match?db=eso&from=2023-03-04",
            multipart("file", "evidence.WAV", &hum_wav(90, 30, 2)),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let task_id = json_body(res).await["task_id"].as_str().unwrap().to_string();

    let mut result = Value::Null;
    for _ in 0..400 {
        let res = app(&h)
            .oneshot(get(&format!("/match/result/{task_id}")))
            .await
            .unwrap();
        result = json_body(res).await;
        if result["ready"] == json!(true) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(result["successful"], json!(true), "{result}");
    assert_eq!(result["value"]["match_time"], "2023-03-04 00:01:30");
    assert!(h.blobs.inner.is_empty());
    assert_eq!(h.blobs.deletes(), 1);

    workers.shutdown().await.unwrap();
}
