//! PostgREST client tests against a mock HTTP server.

use ccraft_models::{TranscriptDocument, VideoId, VideoStatus, VideoUpdate};
use ccraft_store::{PostgrestStore, RecordStore, RetryConfig, StoreConfig, StoreError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> PostgrestStore {
    let mut config = StoreConfig::new(server.uri(), "service-key");
    config.retry = RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..Default::default()
    };
    PostgrestStore::new(config).unwrap()
}

fn video_row(status: &str) -> serde_json::Value {
    json!({
        "id": "v1",
        "user_id": "alice",
        "title": "clip",
        "status": status,
        "original_media_id": "media-1",
        "active_transcript_type": "edited",
        "caption_style": {"fontSize": 24},
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn get_video_filters_by_id_and_owner() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", "eq.v1"))
        .and(query_param("user_id", "eq.alice"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([video_row("ready")])))
        .expect(1)
        .mount(&server)
        .await;

    let video = store_for(&server)
        .get_video(&VideoId::from("v1"), Some("alice"))
        .await
        .unwrap();

    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(video.original_media_id.as_deref(), Some("media-1"));
    assert!(video.caption_style.is_some());
}

#[tokio::test]
async fn get_video_empty_result_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store_for(&server)
        .get_video(&VideoId::from("v1"), Some("mallory"))
        .await;

    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn update_video_sends_partial_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/videos"))
        .and(query_param("id", "eq.v1"))
        .and(header("prefer", "return=representation"))
        .and(body_partial_json(json!({"status": "failed", "error_message": "boom"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([video_row("failed")])))
        .expect(1)
        .mount(&server)
        .await;

    let video = store_for(&server)
        .update_video(&VideoId::from("v1"), &VideoUpdate::failed("boom"))
        .await
        .unwrap();

    assert_eq!(video.status, VideoStatus::Failed);
}

#[tokio::test]
async fn retry_update_clears_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/videos"))
        .and(body_partial_json(json!({"status": "uploading", "error_message": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([video_row("uploading")])))
        .expect(1)
        .mount(&server)
        .await;

    let video = store_for(&server)
        .update_video(&VideoId::from("v1"), &VideoUpdate::retry())
        .await
        .unwrap();

    assert_eq!(video.status, VideoStatus::Uploading);
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transcripts"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transcripts"))
        .and(query_param("video_id", "eq.v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "video_id": "v1",
            "transcript_data": {"text": "hi", "segments": [{"start": 0.0, "end": 1.0, "text": "hi"}]},
            "edited_transcript_data": null
        }])))
        .mount(&server)
        .await;

    let record = store_for(&server)
        .get_transcript(&VideoId::from("v1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.original.unwrap().text, "hi");
    assert!(record.edited.is_none());
}

#[tokio::test]
async fn rate_limited_request_waits_for_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([video_row("ready")])))
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let video = store_for(&server)
        .get_video(&VideoId::from("v1"), None)
        .await
        .unwrap();

    assert_eq!(video.status, VideoStatus::Ready);
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn persistent_rate_limit_surfaces_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let err = store_for(&server)
        .get_video(&VideoId::from("v1"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::RateLimited(0)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_transcript_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transcripts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let record = store_for(&server)
        .get_transcript(&VideoId::from("v1"))
        .await
        .unwrap();

    assert!(record.is_none());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transcripts"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad column"))
        .expect(1)
        .mount(&server)
        .await;

    let result = store_for(&server)
        .save_original_transcript(&VideoId::from("v1"), &TranscriptDocument::default())
        .await;

    assert!(matches!(result, Err(StoreError::RequestFailed(_))));
}

#[tokio::test]
async fn save_original_transcript_upserts_on_video_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transcripts"))
        .and(query_param("on_conflict", "video_id"))
        .and(body_partial_json(json!({"video_id": "v1", "transcript_data": {"text": "hello"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"video_id": "v1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let document = TranscriptDocument {
        text: "hello".into(),
        ..Default::default()
    };
    store_for(&server)
        .save_original_transcript(&VideoId::from("v1"), &document)
        .await
        .unwrap();
}
