use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

use crate::{BlobError, BlobResult, BlobStore, ByteStream, PutResult};

/// Connection settings for an S3-compatible endpoint (AWS, MinIO, RustFS)
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style addressing; most self-hosted endpoints need it
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
        }
    }
}

/// Blob store backed by the AWS SDK
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
}

impl S3CompatibleStore {
    pub async fn connect(config: S3Config) -> BlobResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(BlobError::invalid("S3 bucket name is required"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret, None, None, "enf-config");
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(BlobError::invalid(
                    "S3 access key id and secret must be configured together",
                ))
            }
        }

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.force_path_style)
                .build(),
        );

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    async fn collect_stream(stream: &mut ByteStream) -> BlobResult<Bytes> {
        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data.freeze())
    }

    fn map_aws_error(err: impl std::error::Error + Send + Sync + 'static) -> BlobError {
        BlobError::backend(err)
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        mut stream: ByteStream,
    ) -> BlobResult<PutResult> {
        let data = Self::collect_stream(&mut stream).await?;
        let size_bytes = data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(AwsByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request.send().await.map_err(Self::map_aws_error)?;
        debug!(key, size_bytes, "stored object");

        Ok(PutResult {
            etag: result.e_tag,
            size_bytes,
        })
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                GetObjectError::NoSuchKey(_) => BlobError::not_found(key),
                other => Self::map_aws_error(other),
            })?;

        let body = result.body.collect().await.map_err(Self::map_aws_error)?;
        Ok(body.into_bytes())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        // S3 answers 204 for absent keys too.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_aws_error)?;
        debug!(key, "deleted object");
        Ok(())
    }
}
