//! S3-compatible object store
//!
//! Talks to any endpoint speaking the S3 REST API through `aws-sdk-s3`.
//! Aliyun OSS is reached through its S3-compatible endpoint
//! (`https://oss-<region>.aliyuncs.com`, virtual-hosted addressing).
//!
//! # Example
//!
//! ```no_run
//! use zero_common::config::OssStorageConfig;
//! use zero_common::store::{ObjectStore, S3ObjectStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OssStorageConfig {
//!     endpoint: "https://oss-cn-hangzhou.aliyuncs.com".into(),
//!     access_key_id: Some("LTAI...".into()),
//!     access_key_secret: Some("secret".into()),
//!     bucket_name: "uploads".into(),
//!     region: "oss-cn-hangzhou".into(),
//!     ..OssStorageConfig::default()
//! };
//!
//! let store = S3ObjectStore::connect(&config).await?;
//! let etag = store.put_object("hello.txt", Bytes::from("Hello")).await?;
//! println!("ETag: {}", etag);
//! # Ok(())
//! # }
//! ```

use super::{ListPage, MultipartSession, ObjectStore, StoreError};
use crate::config::OssStorageConfig;
use crate::upload::Part;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Maximum keys accepted by a single DeleteObjects request
pub const MAX_DELETE_BATCH: usize = 1000;

/// Characters left verbatim in an `x-amz-copy-source` key
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// S3 object store
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a store from configuration.
    ///
    /// Uses the configured access key pair when both halves are present,
    /// otherwise falls back to the default AWS credential chain.
    pub async fn connect(config: &OssStorageConfig) -> Result<Self, StoreError> {
        if config.bucket_name.trim().is_empty() {
            return Err(StoreError::ConfigError("bucket name cannot be empty".into()));
        }

        let builder = match (&config.access_key_id, &config.access_key_secret) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(
                    access_key.as_str(),
                    secret_key.as_str(),
                    None,
                    None,
                    "zero-common-static",
                );
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            _ => {
                tracing::debug!("No static OSS credentials configured, using default chain");
                let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
                aws_sdk_s3::config::Builder::from(&sdk_config)
            }
        };

        let mut builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(&config.endpoint);
        }

        tracing::info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket_name,
            region = %config.region,
            "Connected object store"
        );

        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            config.bucket_name.clone(),
        ))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, utf8_percent_encode(key, COPY_SOURCE))
    }
}

fn request_error<E>(operation: &'static str, key: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::RequestError {
        operation,
        key: key.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

fn part_number_i32(part_number: u32) -> Result<i32, StoreError> {
    i32::try_from(part_number).map_err(|_| StoreError::InvalidPart {
        part_number,
        reason: "part number out of range".into(),
    })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(s3.bucket = %self.bucket, s3.key = %key, upload.bytes = body.len()),
        err
    )]
    async fn put_object(&self, key: &str, body: Bytes) -> Result<String, StoreError> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("PutObject", key, e))?;

        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    #[tracing::instrument(
        name = "s3.list_objects",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.prefix = %prefix),
        err
    )]
    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let mut request = self.client.list_objects().bucket(&self.bucket).prefix(prefix);
        if let Some(marker) = marker {
            request = request.marker(marker);
        }

        let output = request
            .send()
            .await
            .map_err(|e| request_error("ListObjects", prefix, e))?;

        let keys: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(String::from))
            .collect();

        let is_truncated = output.is_truncated().unwrap_or(false);
        // NextMarker is only returned for delimited listings; otherwise the
        // last key of the page is the marker.
        let next_marker = if is_truncated {
            output
                .next_marker()
                .map(String::from)
                .or_else(|| keys.last().cloned())
        } else {
            None
        };

        if is_truncated && next_marker.is_none() {
            return Err(StoreError::ResponseError(format!(
                "truncated listing of '{}' without a continuation marker",
                prefix
            )));
        }

        Ok(ListPage {
            keys,
            is_truncated,
            next_marker,
        })
    }

    #[tracing::instrument(
        name = "s3.copy_object",
        skip(self),
        fields(s3.bucket = %self.bucket),
        err
    )]
    async fn copy_object(&self, src_key: &str, dest_key: &str) -> Result<(), StoreError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(src_key))
            .key(dest_key)
            .send()
            .await
            .map_err(|e| request_error("CopyObject", src_key, e))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.key = %key),
        err
    )]
    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("DeleteObject", key, e))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.delete_objects",
        skip(self, keys),
        fields(s3.bucket = %self.bucket, keys_count = keys.len()),
        err
    )]
    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError> {
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| request_error("DeleteObjects", key, e))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let first_key = batch.first().map(String::as_str).unwrap_or_default();
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| request_error("DeleteObjects", first_key, e))?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| request_error("DeleteObjects", first_key, e))?;

            if let Some(failed) = output.errors().first() {
                return Err(StoreError::RequestError {
                    operation: "DeleteObjects",
                    key: failed.key().unwrap_or_default().to_string(),
                    message: failed.message().unwrap_or("delete rejected").to_string(),
                });
            }
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    async fn initiate_multipart_upload(
        &self,
        key: &str,
    ) -> Result<MultipartSession, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", key, e))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| {
                StoreError::ResponseError("CreateMultipartUpload returned no upload id".into())
            })?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());

        Ok(MultipartSession {
            upload_id,
            key: output.key().unwrap_or(key).to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %self.bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len()
        ),
        err
    )]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number_i32(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", key, e))?;

        output
            .e_tag()
            .map(String::from)
            .ok_or_else(|| StoreError::ResponseError("UploadPart returned no ETag".into()))
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(s3.bucket = %self.bucket, s3.upload_id = %upload_id, parts_count = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<String, StoreError> {
        let mut ordered: Vec<&Part> = parts.iter().collect();
        ordered.sort_by_key(|part| part.part_number);

        let completed_parts = ordered
            .into_iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(part_number_i32(part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", key, e))?;

        Ok(output.e_tag().unwrap_or_default().to_string())
    }
}
