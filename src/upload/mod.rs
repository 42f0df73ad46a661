//! Upload module
//!
//! A uniform [`Uploader`] capability over two backends:
//!
//! - [`LocalUploader`] - files beneath a root directory, multipart parts
//!   staged as temp files and concatenated on completion
//! - [`OssUploader`] - any [`ObjectStore`](crate::store::ObjectStore),
//!   multipart delegated to the store
//!
//! Callers obtain a backend through [`build_uploader`] and then drive either
//! the whole-file path ([`Uploader::upload_file`]) or the multipart path
//! (`initiate_multipart_upload` -> `upload_part`... ->
//! `complete_multipart_upload`).
//!
//! [`PartialRecord`] is a separate low-level primitive for resumable uploads
//! appended chunk by chunk on the local filesystem.
//!
//! No operation retries, locks or times out. Concurrent `upload_part` calls
//! for the same part number, or `complete_multipart_upload` racing
//! `upload_part` on one session, are not coordinated; different sessions are
//! independent.

use crate::config::StorageConfig;
use crate::store::{S3ObjectStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod local;
pub mod oss;
pub mod partial;

pub use local::LocalUploader;
pub use oss::OssUploader;
pub use partial::PartialRecord;

/// Namespace every multipart object key and partial record lives under
pub const CHUNK_UPLOAD_DIR: &str = "chunk-upload";

/// Sub-directory of [`CHUNK_UPLOAD_DIR`] holding staged parts and chunk headers
pub const HEADER_DIR: &str = "_header";

/// Highest part number a session accepts
pub const MAX_PARTS: u32 = 10000;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Short read on part {part_number}: expected {expected} bytes, got {actual}")]
    ShortRead {
        part_number: u32,
        expected: u64,
        actual: u64,
    },

    #[error("Unsafe path: {path:?} escapes {root:?}")]
    UnsafePath { path: String, root: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid part number {0}: must be between 1 and 10000")]
    InvalidPartNumber(u32),

    #[error("Multipart upload has no parts")]
    NoParts,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl UploadError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Config(_) => "config",
            UploadError::Io { .. } => "io",
            UploadError::Store(_) => "store",
            UploadError::ShortRead { .. } => "short_read",
            UploadError::UnsafePath { .. } => "unsafe_path",
            UploadError::NotFound(_) => "not_found",
            UploadError::InvalidPartNumber(_) => "invalid_part",
            UploadError::NoParts => "no_parts",
            UploadError::Task(_) => "task",
        }
    }
}

/// Attach operation context to I/O errors
pub(crate) trait IoContext<T> {
    fn io_context<F>(self, context: F) -> Result<T, UploadError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T, UploadError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| UploadError::Io {
            context: context(),
            source,
        })
    }
}

/// A completed part as reported back by `upload_part`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub part_number: u32,
    pub etag: String,
}

impl Part {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// A freshly opened multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub object_key: String,
}

/// Byte source accepted by the upload operations
pub type UploadReader<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Uploader trait
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Driver name, `local` or `oss`
    fn driver(&self) -> &'static str;

    /// Allocate a fresh `chunk-upload/<id><ext>` key and open a session.
    ///
    /// `ext` is a file name or extension; only its lower-cased extension is
    /// kept.
    async fn initiate_multipart_upload(&self, ext: &str) -> Result<MultipartUpload, UploadError>;

    /// Consume exactly `part_size` bytes from `reader` as part `part_number`.
    /// Returns the part ETag.
    async fn upload_part(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        reader: UploadReader<'_>,
        part_size: u64,
    ) -> Result<String, UploadError>;

    /// Assemble `parts` into `object_key` and discard the session.
    /// Returns the final key.
    async fn complete_multipart_upload(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<String, UploadError>;

    /// Store the whole of `reader` at `object_key`, replacing any existing
    /// object. Returns the key.
    ///
    /// The object store backend buffers the full body before sending it;
    /// large remote objects should go through the multipart calls instead.
    async fn upload_file(
        &self,
        object_key: &str,
        reader: UploadReader<'_>,
    ) -> Result<String, UploadError>;

    /// Duplicate every object under `src` to the same relative key under `dest`.
    /// Folders match whole path segments, so `a` does not cover `ab/`.
    async fn copy_folder(&self, src: &str, dest: &str) -> Result<(), UploadError>;

    /// Delete every object under `path` except the `exclude`d sub-paths.
    /// `users/1` covers `users/1/...` but not `users/10/...`.
    async fn delete_folder(&self, path: &str, exclude: &[&str]) -> Result<(), UploadError>;

    /// List object keys under `dir`, keeping only names ending in one of
    /// `suffix_filters` (case-insensitive) when any are given
    async fn list_files(
        &self,
        dir: &str,
        suffix_filters: &[&str],
    ) -> Result<Vec<String>, UploadError>;

    /// Remove one object
    async fn delete_file(&self, object_key: &str) -> Result<(), UploadError>;
}

/// Build the uploader selected by `config.driver`
pub async fn build_uploader(config: &StorageConfig) -> Result<Arc<dyn Uploader>, UploadError> {
    match config.driver.as_str() {
        "local" => {
            tracing::info!(directory = %config.local.directory, "Using local storage");
            Ok(Arc::new(LocalUploader::new(&config.local.directory)))
        }
        "oss" => {
            let store = S3ObjectStore::connect(&config.oss).await?;
            Ok(Arc::new(OssUploader::new(Arc::new(store))))
        }
        other => Err(UploadError::Config(format!(
            "unsupported storage driver: {}",
            other
        ))),
    }
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Nanosecond timestamp, bumped when needed so ids never repeat in-process
pub(crate) fn next_id() -> String {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let previous = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1).to_string()
}

/// Lower-cased extension of the last path element, dot included
pub(crate) fn extension_of(name: &str) -> String {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    match file_name.rfind('.') {
        Some(dot) => file_name[dot..].to_lowercase(),
        None => String::new(),
    }
}

/// Object key for a new multipart session
pub(crate) fn chunk_object_key(id: &str, ext: &str) -> String {
    format!("{}/{}{}", CHUNK_UPLOAD_DIR, id, extension_of(ext))
}

/// Whether `name` ends in one of `filters`, ignoring case. An empty filter
/// list matches everything.
pub(crate) fn matches_suffix(name: &str, filters: &[&str]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    filters
        .iter()
        .any(|suffix| name.ends_with(&suffix.to_lowercase()))
}

pub(crate) fn check_part_number(part_number: u32) -> Result<(), UploadError> {
    if part_number == 0 || part_number > MAX_PARTS {
        return Err(UploadError::InvalidPartNumber(part_number));
    }
    Ok(())
}
