//! Object store uploader
//!
//! Maps the [`Uploader`] operations onto an [`ObjectStore`]. Multipart
//! sessions are native store sessions; folder operations walk the prefix
//! listing page by page.

use super::{
    check_part_number, chunk_object_key, matches_suffix, next_id, IoContext, MultipartUpload,
    Part, UploadError, UploadReader, Uploader,
};
use crate::metrics;
use crate::store::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const DRIVER: &str = "oss";

/// Cap on the up-front buffer reservation for a part
const MAX_PREALLOCATE: u64 = 16 * 1024 * 1024;

/// Object store uploader
#[derive(Clone)]
pub struct OssUploader {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for OssUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OssUploader")
            .field("bucket", &self.store.bucket())
            .finish()
    }
}

impl OssUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Underlying object store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Every key under `prefix`, across all listing pages
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.store.list_objects(prefix, marker.as_deref()).await?;
            let next = page.next_marker.or_else(|| page.keys.last().cloned());
            keys.extend(page.keys);
            if !page.is_truncated {
                break;
            }
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

/// Listing prefix covering everything beneath `folder` and nothing beside it
fn folder_prefix(folder: &str) -> String {
    let base = folder.trim_end_matches('/');
    if base.is_empty() {
        String::new()
    } else {
        format!("{}/", base)
    }
}

/// Full key prefixes that survive a folder delete
fn exclusion_prefixes(folder: &str, exclude: &[&str]) -> Vec<String> {
    let base = folder.trim_end_matches('/');
    exclude
        .iter()
        .map(|entry| entry.trim_matches('/'))
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if base.is_empty() {
                entry.to_string()
            } else {
                format!("{}/{}", base, entry)
            }
        })
        .collect()
}

/// Whether `key` is an excluded path itself or lies beneath one
fn is_excluded(key: &str, exclusions: &[String]) -> bool {
    exclusions.iter().any(|ex| {
        key == ex
            || key
                .strip_prefix(ex.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

async fn read_part(
    reader: UploadReader<'_>,
    part_number: u32,
    part_size: u64,
) -> Result<Bytes, UploadError> {
    let mut buffer = Vec::with_capacity(part_size.min(MAX_PREALLOCATE) as usize);
    reader
        .take(part_size)
        .read_to_end(&mut buffer)
        .await
        .io_context(|| format!("failed to read part {}", part_number))?;

    let actual = buffer.len() as u64;
    if actual < part_size {
        metrics::record_error("short_read");
        return Err(UploadError::ShortRead {
            part_number,
            expected: part_size,
            actual,
        });
    }
    Ok(Bytes::from(buffer))
}

#[async_trait]
impl Uploader for OssUploader {
    fn driver(&self) -> &'static str {
        DRIVER
    }

    #[tracing::instrument(name = "upload.oss.initiate", skip(self), fields(bucket = %self.store.bucket()), err)]
    async fn initiate_multipart_upload(&self, ext: &str) -> Result<MultipartUpload, UploadError> {
        let object_key = chunk_object_key(&next_id(), ext);
        let session = self.store.initiate_multipart_upload(&object_key).await?;

        tracing::debug!(object_key = %session.key, upload_id = %session.upload_id, "Initiated multipart upload");
        Ok(MultipartUpload {
            upload_id: session.upload_id,
            object_key: session.key,
        })
    }

    #[tracing::instrument(
        name = "upload.oss.upload_part",
        skip(self, reader),
        fields(upload_id = %upload_id, part_number = part_number, part_size = part_size),
        err
    )]
    async fn upload_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        reader: UploadReader<'_>,
        part_size: u64,
    ) -> Result<String, UploadError> {
        check_part_number(part_number)?;
        let body = read_part(reader, part_number, part_size).await?;
        let etag = self
            .store
            .upload_part(object_key, upload_id, part_number, body)
            .await?;

        metrics::record_part(DRIVER, part_size);
        Ok(etag)
    }

    #[tracing::instrument(
        name = "upload.oss.complete",
        skip(self, parts),
        fields(upload_id = %upload_id, parts_count = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<String, UploadError> {
        if parts.is_empty() {
            return Err(UploadError::NoParts);
        }
        for part in parts {
            check_part_number(part.part_number)?;
        }

        match self
            .store
            .complete_multipart_upload(object_key, upload_id, parts)
            .await
        {
            Ok(etag) => {
                metrics::record_multipart_success(DRIVER, parts.len());
                tracing::info!(object_key = %object_key, etag = %etag, "Completed multipart upload");
                Ok(object_key.to_string())
            }
            Err(e) => {
                metrics::record_multipart_failure(DRIVER);
                Err(e.into())
            }
        }
    }

    #[tracing::instrument(name = "upload.oss.upload_file", skip(self, reader), err)]
    async fn upload_file(
        &self,
        object_key: &str,
        reader: UploadReader<'_>,
    ) -> Result<String, UploadError> {
        let result = async {
            let mut buffer = Vec::new();
            reader
                .read_to_end(&mut buffer)
                .await
                .io_context(|| format!("failed to read body for {}", object_key))?;
            let bytes = buffer.len() as u64;
            self.store
                .put_object(object_key, Bytes::from(buffer))
                .await?;
            Ok::<u64, UploadError>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => {
                metrics::record_upload_success(DRIVER, bytes);
                Ok(object_key.to_string())
            }
            Err(e) => {
                metrics::record_upload_failure(DRIVER);
                Err(e)
            }
        }
    }

    #[tracing::instrument(name = "upload.oss.copy_folder", skip(self), err)]
    async fn copy_folder(&self, src: &str, dest: &str) -> Result<(), UploadError> {
        let src_prefix = folder_prefix(src);
        let dest_prefix = folder_prefix(dest);
        if src_prefix == dest_prefix {
            return Ok(());
        }

        let result = async {
            // Snapshot the listing so a destination under the source is not re-copied
            let keys = self.list_all(&src_prefix).await?;
            for key in &keys {
                let relative = key.strip_prefix(src_prefix.as_str()).unwrap_or(key);
                let dest_key = format!("{}{}", dest_prefix, relative);
                self.store.copy_object(key, &dest_key).await?;
            }
            Ok::<usize, UploadError>(keys.len())
        }
        .await;
        metrics::record_storage_operation(DRIVER, "copy_folder", result.is_ok());

        let copied = result?;
        tracing::info!(objects = copied, "Copied folder");
        Ok(())
    }

    #[tracing::instrument(name = "upload.oss.delete_folder", skip(self), err)]
    async fn delete_folder(&self, path: &str, exclude: &[&str]) -> Result<(), UploadError> {
        let exclusions = exclusion_prefixes(path, exclude);
        let prefix = folder_prefix(path);

        let result = async {
            let mut deleted = 0usize;
            let mut marker: Option<String> = None;
            loop {
                let page = self.store.list_objects(&prefix, marker.as_deref()).await?;
                let next = page
                    .next_marker
                    .clone()
                    .or_else(|| page.keys.last().cloned());

                let batch: Vec<String> = page
                    .keys
                    .into_iter()
                    .filter(|key| !is_excluded(key, &exclusions))
                    .collect();
                if !batch.is_empty() {
                    self.store.delete_objects(&batch).await?;
                    deleted += batch.len();
                }

                if !page.is_truncated {
                    break;
                }
                match next {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }
            Ok::<usize, UploadError>(deleted)
        }
        .await;
        metrics::record_storage_operation(DRIVER, "delete_folder", result.is_ok());

        let deleted = result?;
        tracing::info!(objects = deleted, "Deleted folder");
        Ok(())
    }

    #[tracing::instrument(name = "upload.oss.list_files", skip(self), err)]
    async fn list_files(
        &self,
        dir: &str,
        suffix_filters: &[&str],
    ) -> Result<Vec<String>, UploadError> {
        let result = self.list_all(dir).await.map(|keys| {
            keys.into_iter()
                .filter(|key| matches_suffix(key, suffix_filters))
                .collect::<Vec<_>>()
        });
        metrics::record_storage_operation(DRIVER, "list_files", result.is_ok());
        result
    }

    #[tracing::instrument(name = "upload.oss.delete_file", skip(self), err)]
    async fn delete_file(&self, object_key: &str) -> Result<(), UploadError> {
        let result = self.store.delete_object(object_key).await;
        metrics::record_storage_operation(DRIVER, "delete_file", result.is_ok());
        Ok(result?)
    }
}
