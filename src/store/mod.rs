//! Object store capability
//!
//! The remote uploader only needs a small slice of an object store: whole
//! object put, marker-paginated prefix listing, copy, single and bulk delete,
//! and the multipart initiate/upload-part/complete lifecycle. Any store
//! exposing that set can back [`crate::upload::OssUploader`].
//!
//! # Implementations
//!
//! - [`S3ObjectStore`] - S3-compatible HTTP API (AWS, Aliyun OSS, MinIO, ...)
//! - [`MemoryObjectStore`] - in-process map, used by tests and embedders

use crate::upload::Part;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Object store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{operation} failed for '{key}': {message}")]
    RequestError {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("No such key: {0}")]
    NoSuchKey(String),

    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
}

/// One page of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// More keys follow; list again from `next_marker`
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// A multipart session opened on the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub upload_id: String,
    pub key: String,
}

/// Object store trait
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket (or namespace) the store operates on
    fn bucket(&self) -> &str;

    /// Store `body` at `key`, replacing any existing object. Returns the ETag.
    async fn put_object(&self, key: &str, body: Bytes) -> Result<String, StoreError>;

    /// List keys starting with `prefix`, strictly after `marker` when given
    async fn list_objects(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Server-side copy of one object
    async fn copy_object(&self, src_key: &str, dest_key: &str) -> Result<(), StoreError>;

    /// Delete one object
    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Delete many objects in as few requests as the store allows
    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Open a multipart session for `key`
    async fn initiate_multipart_upload(&self, key: &str)
        -> Result<MultipartSession, StoreError>;

    /// Upload one part of a session. Returns the part ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// Assemble the listed parts, in ascending part number order, into `key`
    /// and close the session. Returns the object ETag.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<String, StoreError>;
}
