//! Whisper client against a mock HTTP server.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ccraft_worker::{SpeechToText, WhisperClient, WhisperConfig, WorkerError};

fn client_for(server: &MockServer) -> WhisperClient {
    let mut config = WhisperConfig::new("test-key");
    config.base_url = format!("{}/v1/", server.uri());
    WhisperClient::new(config).unwrap()
}

async fn audio_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("v1.mp3");
    tokio::fs::write(&path, b"ID3 fake mp3").await.unwrap();
    path
}

#[tokio::test]
async fn transcribe_posts_multipart_and_parses_segments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("whisper-1"))
        .and(body_string_contains("verbose_json"))
        .and(body_string_contains("filename=\"v1.mp3\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task": "transcribe",
            "language": "english",
            "duration": 2.5,
            "text": "Hello there.",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 2.5, "text": " Hello there.", "tokens": [1, 2]}
            ],
            "words": [
                {"word": "Hello", "start": 0.0, "end": 0.8},
                {"word": "there.", "start": 0.9, "end": 2.5}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let document = client_for(&server)
        .transcribe(&audio_file(&dir).await)
        .await
        .unwrap();

    assert_eq!(document.text, "Hello there.");
    assert_eq!(document.language.as_deref(), Some("english"));
    assert_eq!(document.words.len(), 2);
    let segments = document.usable_segments().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].end, 2.5);
}

#[tokio::test]
async fn error_status_is_reported_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = client_for(&server)
        .transcribe(&audio_file(&dir).await)
        .await
        .unwrap_err();

    match &err {
        WorkerError::SpeechToText(message) => {
            assert!(message.starts_with("429"));
            assert!(message.contains("rate limited"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_audio_file_is_io_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let err = client_for(&server)
        .transcribe(&dir.path().join("missing.mp3"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Io(_)));
}
