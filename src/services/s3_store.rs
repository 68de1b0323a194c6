//! S3-compatible object store client (AWS S3, Backblaze B2, MinIO, ...).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use bytes::Bytes;

use super::object_store::{ObjectStoreClient, ObjectStoreError, ObjectStoreResult};
use crate::{config::StorageConfig, models::multipart::CompletedPart};

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from explicit configuration.
    ///
    /// Static credentials are used when both key id and secret are set;
    /// otherwise the default AWS provider chain is consulted.
    pub async fn new(config: &StorageConfig) -> Self {
        let region = Region::new(config.region.clone());

        let client = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials = Credentials::new(key_id, secret, None, None, "omniload");
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
                    .force_path_style(true);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
                if let Some(endpoint) = &config.endpoint {
                    loader = loader.endpoint_url(endpoint);
                }
                let shared = loader.load().await;
                let s3_config = aws_sdk_s3::config::Builder::from(&shared)
                    .force_path_style(true)
                    .build();
                Client::from_conf(s3_config)
            }
        };

        tracing::info!(
            "S3 client ready (endpoint: {}, region: {})",
            config.endpoint.as_deref().unwrap_or("default"),
            config.region
        );

        Self { client }
    }
}

fn backend_error<E>(operation: &'static str, key: &str, err: E) -> ObjectStoreError
where
    E: std::error::Error,
{
    ObjectStoreError::Backend {
        operation,
        key: key.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| backend_error("put_object", key, err))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|err| backend_error("create_multipart_upload", key, err))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| ObjectStoreError::MissingField {
                key: key.to_string(),
                field: "upload id",
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> ObjectStoreResult<String> {
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| backend_error("upload_part", key, err))?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| ObjectStoreError::MissingField {
                key: key.to_string(),
                field: "part etag",
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectStoreResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        S3CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| backend_error("complete_multipart_upload", key, err))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> ObjectStoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| backend_error("abort_multipart_upload", key, err))?;
        Ok(())
    }
}
