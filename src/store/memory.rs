//! In-memory object store
//!
//! Keeps objects in an ordered map so listings come back in key order with
//! marker pagination, like a real bucket. The page size is configurable so
//! callers can exercise multi-page listings with a handful of objects.

use super::{ListPage, MultipartSession, ObjectStore, StoreError};
use crate::upload::Part;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Default listing page size, matching the S3 default
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// In-memory object store
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_page_size(bucket, DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store returning at most `page_size` keys per listing
    pub fn with_page_size(bucket: impl Into<String>, page_size: usize) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: page_size.max(1),
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Object content, if present
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Number of multipart sessions not yet completed
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<String, StoreError> {
        let etag = etag_of(&body);
        self.objects.lock().insert(key.to_string(), body);
        Ok(etag)
    }

    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let objects = self.objects.lock();

        let start = match marker {
            Some(marker) => Bound::Excluded(marker),
            None => Bound::Included(prefix),
        };

        let mut keys: Vec<String> = objects
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .skip_while(|key| key.as_str() < prefix)
            .take_while(|key| key.starts_with(prefix))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let is_truncated = keys.len() > self.page_size;
        keys.truncate(self.page_size);
        let next_marker = if is_truncated { keys.last().cloned() } else { None };

        Ok(ListPage {
            keys,
            is_truncated,
            next_marker,
        })
    }

    async fn copy_object(&self, src_key: &str, dest_key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock();
        let body = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchKey(src_key.to_string()))?;
        objects.insert(dest_key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        // Deleting an absent key succeeds, as it does on S3
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        key: &str,
    ) -> Result<MultipartSession, StoreError> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartSession {
            upload_id,
            key: key.to_string(),
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let etag = etag_of(&body);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<String, StoreError> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let mut ordered: Vec<&Part> = parts.iter().collect();
        ordered.sort_by_key(|part| part.part_number);

        let mut content = BytesMut::new();
        for part in &ordered {
            let (etag, body) =
                upload
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| StoreError::InvalidPart {
                        part_number: part.part_number,
                        reason: "part was never uploaded".into(),
                    })?;
            if *etag != part.etag {
                return Err(StoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: format!("ETag mismatch: expected {}, got {}", etag, part.etag),
                });
            }
            content.extend_from_slice(body);
        }

        uploads.remove(upload_id);
        drop(uploads);

        let content = content.freeze();
        let etag = format!("{}-{}", etag_of(&content), ordered.len());
        self.objects.lock().insert(key.to_string(), content);
        Ok(etag)
    }
}
