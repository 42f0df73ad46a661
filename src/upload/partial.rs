//! Resumable partial upload record
//!
//! Bookkeeping for one local upload that arrives as raw sequential chunks
//! rather than as a multipart session:
//!
//! ```text
//! <root>/chunk-upload/<temp><ext>.part    data received so far
//! <root>/chunk-upload/_header/<temp>      next expected chunk index, "N\n"
//! ```
//!
//! The data file and the header are removed independently by [`delete`] and
//! [`unset_chunk_index`]; a caller abandoning an upload must call both.
//!
//! [`delete`]: PartialRecord::delete
//! [`unset_chunk_index`]: PartialRecord::unset_chunk_index

use super::{IoContext, UploadError, CHUNK_UPLOAD_DIR, HEADER_DIR};
use md5::{Digest, Md5};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// One in-progress resumable upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRecord {
    /// Final file name, `<temp><ext>`
    pub temp_name: String,
    pub data_path: PathBuf,
    pub header_path: PathBuf,
    /// Last chunk index read or written through this record
    pub chunk_index: u64,
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

impl PartialRecord {
    /// Describe the record for `temp` under `root`. Nothing is touched on
    /// disk until [`create`](Self::create).
    ///
    /// `temp` and `extension` must not contain path separators.
    pub fn new(root: impl AsRef<Path>, temp: &str, extension: &str) -> Result<Self, UploadError> {
        let root = root.as_ref();
        let temp_name = format!("{}{}", temp, extension);
        if !is_single_component(temp) || !is_single_component(&temp_name) {
            return Err(UploadError::UnsafePath {
                path: temp_name,
                root: root.display().to_string(),
            });
        }

        let chunk_dir = root.join(CHUNK_UPLOAD_DIR);
        Ok(Self {
            data_path: chunk_dir.join(format!("{}.part", temp_name)),
            header_path: chunk_dir.join(HEADER_DIR).join(temp),
            temp_name,
            chunk_index: 0,
        })
    }

    /// Create (or reset) the empty data file and a header holding index 0
    pub async fn create(&mut self) -> Result<(), UploadError> {
        for path in [&self.data_path, &self.header_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .io_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }

        File::create(&self.data_path)
            .await
            .io_context(|| format!("failed to create {}", self.data_path.display()))?;
        self.set_chunk_index(0).await
    }

    /// Remove the data file
    pub async fn delete(&self) -> Result<(), UploadError> {
        fs::remove_file(&self.data_path)
            .await
            .io_context(|| format!("failed to delete {}", self.data_path.display()))
    }

    /// Move the data file to its final name in the same directory
    pub async fn rename(&self) -> Result<PathBuf, UploadError> {
        let target = self
            .data_path
            .with_file_name(&self.temp_name);
        fs::rename(&self.data_path, &target).await.io_context(|| {
            format!(
                "failed to rename {} -> {}",
                self.data_path.display(),
                target.display()
            )
        })?;
        Ok(target)
    }

    /// Whether the data file exists
    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.data_path).await.unwrap_or(false)
    }

    /// Hex MD5 of the data file
    pub async fn calculate_hash(&self) -> Result<String, UploadError> {
        let mut file = File::open(&self.data_path)
            .await
            .io_context(|| format!("failed to open {}", self.data_path.display()))?;

        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .io_context(|| format!("failed to read {}", self.data_path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Append one chunk to the data file. Returns the bytes written.
    pub async fn append(
        &self,
        reader: &mut (dyn tokio::io::AsyncRead + Unpin + Send),
    ) -> Result<u64, UploadError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.data_path)
            .await
            .io_context(|| format!("failed to open {}", self.data_path.display()))?;

        let written = tokio::io::copy(reader, &mut file)
            .await
            .io_context(|| format!("failed to append to {}", self.data_path.display()))?;
        file.flush()
            .await
            .io_context(|| format!("failed to append to {}", self.data_path.display()))?;

        tracing::trace!(path = %self.data_path.display(), bytes = written, "Appended chunk");
        Ok(written)
    }

    /// Persist the next expected chunk index
    pub async fn set_chunk_index(&mut self, index: u64) -> Result<(), UploadError> {
        fs::write(&self.header_path, format!("{}\n", index))
            .await
            .io_context(|| format!("failed to write {}", self.header_path.display()))?;
        self.chunk_index = index;
        Ok(())
    }

    /// Read the persisted chunk index
    pub async fn get_chunk_index(&mut self) -> Result<u64, UploadError> {
        let content = fs::read_to_string(&self.header_path)
            .await
            .io_context(|| format!("failed to read {}", self.header_path.display()))?;

        let index = content.trim().parse::<u64>().map_err(|e| UploadError::Io {
            context: format!("corrupt chunk index in {}", self.header_path.display()),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        self.chunk_index = index;
        Ok(index)
    }

    /// Remove the header file
    pub async fn unset_chunk_index(&self) -> Result<(), UploadError> {
        fs::remove_file(&self.header_path)
            .await
            .io_context(|| format!("failed to delete {}", self.header_path.display()))
    }
}
