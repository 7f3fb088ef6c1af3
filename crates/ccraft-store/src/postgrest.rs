//! PostgREST-backed record store.
//!
//! - Equality filters (`id=eq.<id>`, `user_id=eq.<owner>`)
//! - Service-key auth via `apikey` and bearer headers
//! - Transient failures retried with backoff and jitter
//! - Tracing span and metrics per request

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info_span, Instrument};

use ccraft_models::{TranscriptDocument, TranscriptRecord, VideoId, VideoRecord, VideoUpdate};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::store::RecordStore;

const VIDEOS: &str = "videos";
const TRANSCRIPTS: &str = "transcripts";

/// Record store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgREST root, e.g. `https://<project>.supabase.co/rest/v1`
    pub rest_url: String,
    /// Service-role key
    pub service_key: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl StoreConfig {
    pub fn new(rest_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            rest_url: rest_url.into(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let rest_url = std::env::var("DATABASE_REST_URL")
            .map_err(|_| StoreError::config("DATABASE_REST_URL must be set"))?;
        let service_key = std::env::var("DATABASE_SERVICE_KEY")
            .map_err(|_| StoreError::config("DATABASE_SERVICE_KEY must be set"))?;

        if service_key.is_empty() {
            return Err(StoreError::config("DATABASE_SERVICE_KEY cannot be empty"));
        }

        let timeout_secs: u64 = std::env::var("DATABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(rest_url, service_key)
        })
    }
}

/// PostgREST client implementing [`RecordStore`].
#[derive(Clone)]
pub struct PostgrestStore {
    http: Client,
    config: StoreConfig,
    base_url: String,
}

impl PostgrestStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let parsed = url::Url::parse(&config.rest_url)
            .map_err(|e| StoreError::config(format!("invalid DATABASE_REST_URL: {}", e)))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("ccraft-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    async fn execute_request<T, F>(&self, operation: &str, table: &str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = info_span!("store_request", operation = %operation, table = %table);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    /// Send and decode a JSON array of rows.
    async fn rows<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> StoreResult<Vec<T>> {
        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            _ => Err(Self::handle_error_response(status, url, response).await),
        }
    }

    async fn handle_error_response(status: StatusCode, url: &str, response: reqwest::Response) -> StoreError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok());
            return StoreError::rate_limited(retry_after);
        }

        let body = response.text().await.unwrap_or_default();
        StoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn get_video(&self, id: &VideoId, owner: Option<&str>) -> StoreResult<VideoRecord> {
        let url = self.table_url(VIDEOS);
        let mut filters = vec![("id", format!("eq.{}", id)), ("select", "*".to_string())];
        if let Some(owner) = owner {
            filters.push(("user_id", format!("eq.{}", owner)));
        }

        self.execute_request("get_video", VIDEOS, async {
            let rows: Vec<VideoRecord> = with_retry(&self.config.retry, "get_video", || {
                let request = self.authed(self.http.get(&url)).query(&filters);
                Self::rows(request, &url)
            })
            .await?;

            rows.into_iter()
                .next()
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", VIDEOS, id)))
        })
        .await
    }

    async fn update_video(&self, id: &VideoId, update: &VideoUpdate) -> StoreResult<VideoRecord> {
        let url = self.table_url(VIDEOS);
        let filters = [("id", format!("eq.{}", id))];

        let mut body = serde_json::to_value(update)?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("updated_at".to_string(), serde_json::json!(Utc::now()));
        }

        self.execute_request("update_video", VIDEOS, async {
            let rows: Vec<VideoRecord> = with_retry(&self.config.retry, "update_video", || {
                let request = self
                    .authed(self.http.patch(&url))
                    .query(&filters)
                    .header("Prefer", "return=representation")
                    .json(&body);
                Self::rows(request, &url)
            })
            .await?;

            debug!(video_id = %id, "Updated video record");
            rows.into_iter()
                .next()
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", VIDEOS, id)))
        })
        .await
    }

    async fn get_transcript(&self, video_id: &VideoId) -> StoreResult<Option<TranscriptRecord>> {
        let url = self.table_url(TRANSCRIPTS);
        let filters = [
            ("video_id", format!("eq.{}", video_id)),
            ("select", "*".to_string()),
        ];

        self.execute_request("get_transcript", TRANSCRIPTS, async {
            let rows: Vec<TranscriptRecord> = with_retry(&self.config.retry, "get_transcript", || {
                let request = self.authed(self.http.get(&url)).query(&filters);
                Self::rows(request, &url)
            })
            .await?;
            Ok(rows.into_iter().next())
        })
        .await
    }

    async fn save_original_transcript(
        &self,
        video_id: &VideoId,
        document: &TranscriptDocument,
    ) -> StoreResult<()> {
        let url = self.table_url(TRANSCRIPTS);
        let filters = [("on_conflict", "video_id".to_string())];
        let body = serde_json::json!({
            "video_id": video_id,
            "transcript_data": document,
            "updated_at": Utc::now(),
        });

        self.execute_request("save_original_transcript", TRANSCRIPTS, async {
            let _: Vec<serde_json::Value> =
                with_retry(&self.config.retry, "save_original_transcript", || {
                    let request = self
                        .authed(self.http.post(&url))
                        .query(&filters)
                        .header("Prefer", "resolution=merge-duplicates,return=representation")
                        .json(&body);
                    Self::rows(request, &url)
                })
                .await?;
            debug!(video_id = %video_id, "Saved original transcript");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        let result = PostgrestStore::new(StoreConfig::new("not a url", "key"));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_table_url_trims_trailing_slash() {
        let store = PostgrestStore::new(StoreConfig::new("http://localhost:3000/rest/v1/", "key")).unwrap();
        assert_eq!(store.table_url(VIDEOS), "http://localhost:3000/rest/v1/videos");
    }
}
