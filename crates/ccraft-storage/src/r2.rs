//! R2 client implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::storage::{image_key, video_key, ObjectStorage, StoredObject};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Lifetime of presigned retrieval URLs
    pub url_ttl: Duration,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let url_ttl_secs: u64 = std::env::var("R2_URL_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            url_ttl: Duration::from_secs(url_ttl_secs),
        })
    }
}

/// Cloudflare R2 object storage.
#[derive(Clone)]
pub struct R2Storage {
    client: Client,
    bucket: String,
    url_ttl: Duration,
}

impl R2Storage {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            url_ttl: config.url_ttl,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} to {}", path.display(), key);

        if !tokio::fs::try_exists(path).await? {
            return Err(StorageError::not_found(path.display().to_string()));
        }

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Generate a presigned URL for GET.
    async fn presign_get(&self, key: &str) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(self.url_ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn upload(
        &self,
        path: &Path,
        public_id: &str,
        key: String,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        self.upload_file(path, &key, content_type).await?;
        let url = self.presign_get(&key).await?;
        Ok(StoredObject {
            public_id: public_id.to_string(),
            key,
            url,
        })
    }
}

#[async_trait]
impl ObjectStorage for R2Storage {
    async fn upload_video(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject> {
        self.upload(path, public_id, video_key(public_id)?, "video/mp4")
            .await
    }

    async fn upload_image(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject> {
        self.upload(path, public_id, image_key(public_id)?, "image/jpeg")
            .await
    }

    async fn video_url(&self, public_id: &str) -> StorageResult<String> {
        self.presign_get(&video_key(public_id)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> R2Storage {
        R2Storage::new(R2Config {
            endpoint_url: "https://account.r2.cloudflarestorage.com".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: "media".to_string(),
            region: "auto".to_string(),
            url_ttl: Duration::from_secs(600),
        })
    }

    #[tokio::test]
    async fn test_video_url_is_presigned_path_style() {
        let url = storage().video_url("v1").await.unwrap();
        assert!(url.starts_with("https://account.r2.cloudflarestorage.com/media/videos/v1.mp4?"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=600"));
    }

    #[tokio::test]
    async fn test_video_url_rejects_bad_id() {
        let result = storage().video_url("../secret").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let result = storage()
            .upload_video(&dir.path().join("missing.mp4"), "v1")
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
