//! Local filesystem uploader
//!
//! Every object key resolves lexically beneath a root directory; keys that
//! would climb out of it are refused before the filesystem is touched.
//!
//! # Layout
//!
//! ```text
//! <root>/<object_key>                                  final objects
//! <root>/chunk-upload/_header/<upload_id>_part<N>      staged multipart parts
//! ```
//!
//! Completion concatenates the staged parts in the order the caller lists
//! them. If a part is missing or unreadable the call fails and the final file
//! is left partially written; staged parts are only removed once every part
//! has been merged. A session that is never completed leaves its parts
//! behind.

use super::{
    check_part_number, chunk_object_key, matches_suffix, next_id, IoContext, MultipartUpload,
    Part, UploadError, UploadReader, Uploader, CHUNK_UPLOAD_DIR, HEADER_DIR,
};
use crate::metrics;
use async_trait::async_trait;
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use walkdir::WalkDir;

/// Buffer used when merging parts into the final file (5MB)
pub const MERGE_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Buffer used when streaming a part to disk
const PART_BUFFER_SIZE: usize = 64 * 1024;

const DRIVER: &str = "local";

/// Local filesystem uploader
#[derive(Debug, Clone)]
pub struct LocalUploader {
    root: PathBuf,
}

impl LocalUploader {
    /// Create an uploader rooted at `directory`
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            root: directory.as_ref().to_path_buf(),
        }
    }

    /// Root directory all keys resolve beneath
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` beneath the root. The root itself is allowed.
    fn resolve(&self, key: &str) -> Result<PathBuf, UploadError> {
        normalize_under(&self.root, key).ok_or_else(|| UploadError::UnsafePath {
            path: key.to_string(),
            root: self.root.display().to_string(),
        })
    }

    /// Resolve `key` strictly beneath the root
    fn resolve_inside(&self, key: &str) -> Result<PathBuf, UploadError> {
        let path = self.resolve(key)?;
        if path == self.root {
            return Err(UploadError::UnsafePath {
                path: key.to_string(),
                root: self.root.display().to_string(),
            });
        }
        Ok(path)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> Result<PathBuf, UploadError> {
        let mut components = Path::new(upload_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(UploadError::UnsafePath {
                    path: upload_id.to_string(),
                    root: self.root.display().to_string(),
                })
            }
        }
        Ok(self
            .root
            .join(CHUNK_UPLOAD_DIR)
            .join(HEADER_DIR)
            .join(format!("{}_part{}", upload_id, part_number)))
    }

    /// Turn an absolute path under the root back into a `/`-separated key
    fn key_of(root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

/// Join `relative` onto `base` lexically, refusing any result outside `base`.
///
/// A leading `/` is ignored, as is `.`; `..` may not climb above `base`.
fn normalize_under(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut stack: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => stack.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                stack.pop()?;
            }
            Component::Prefix(_) => return None,
        }
    }
    let mut path = base.to_path_buf();
    path.extend(stack);
    Some(path)
}

async fn ensure_parent(path: &Path) -> Result<(), UploadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .io_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

async fn run_blocking<T, F>(task: F) -> Result<T, UploadError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, UploadError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| UploadError::Task(e.to_string()))?
}

fn copy_tree(src: &Path, dest: &Path) -> Result<u64, UploadError> {
    if !src.exists() {
        return Err(UploadError::NotFound(src.display().to_string()));
    }
    if src == dest {
        return Ok(0);
    }

    if src.is_file() {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        std::fs::copy(src, dest)
            .io_context(|| format!("failed to copy {} -> {}", src.display(), dest.display()))?;
        return Ok(1);
    }

    // Snapshot first so a destination inside the source is not walked
    let entries = WalkDir::new(src)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| UploadError::Io {
            context: format!("failed to walk {}", src.display()),
            source: e.into(),
        })?;

    let mut copied = 0;
    for entry in entries {
        let relative = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
        let target = dest.join(relative);
        if target == entry.path() {
            continue;
        }
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .io_context(|| format!("failed to create directory {}", target.display()))?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .io_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target).io_context(|| {
                format!(
                    "failed to copy {} -> {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied += 1;
        } else {
            tracing::warn!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(copied)
}

fn delete_tree(folder: &Path, excluded: &[PathBuf]) -> Result<u64, UploadError> {
    if !folder.exists() {
        tracing::warn!(path = %folder.display(), "Folder does not exist, nothing to delete");
        return Ok(0);
    }

    // Directories on the way to an excluded entry must survive
    let mut keep: HashSet<PathBuf> = HashSet::new();
    for path in excluded.iter().filter(|p| p.exists()) {
        for ancestor in path.ancestors().skip(1) {
            keep.insert(ancestor.to_path_buf());
            if ancestor == folder {
                break;
            }
        }
    }

    let mut paths = Vec::new();
    let walker = WalkDir::new(folder)
        .into_iter()
        .filter_entry(|entry| !excluded.iter().any(|ex| ex == entry.path()));
    for entry in walker {
        match entry {
            Ok(entry) => paths.push((entry.path().to_path_buf(), entry.file_type().is_dir())),
            Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => {
                tracing::warn!(error = %e, "Entry vanished during walk");
            }
            Err(e) => {
                return Err(UploadError::Io {
                    context: format!("failed to walk {}", folder.display()),
                    source: e.into(),
                })
            }
        }
    }

    // Deepest first, so files go before their directories
    let mut removed = 0;
    for (path, is_dir) in paths.into_iter().rev() {
        let result = if is_dir {
            if keep.contains(&path) {
                continue;
            }
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(UploadError::Io {
                    context: format!("failed to delete {}", path.display()),
                    source: e,
                })
            }
        }
    }
    Ok(removed)
}

fn list_tree(root: &Path, dir: &Path, filters: &[String]) -> Result<Vec<String>, UploadError> {
    if !dir.exists() {
        return Err(UploadError::NotFound(dir.display().to_string()));
    }

    let filters: Vec<&str> = filters.iter().map(String::as_str).collect();
    let mut keys = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| UploadError::Io {
            context: format!("failed to walk {}", dir.display()),
            source: e.into(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !matches_suffix(&name, &filters) {
            continue;
        }
        if let Some(key) = LocalUploader::key_of(root, entry.path()) {
            keys.push(key);
        }
    }
    Ok(keys)
}

#[async_trait]
impl Uploader for LocalUploader {
    fn driver(&self) -> &'static str {
        DRIVER
    }

    #[tracing::instrument(name = "upload.local.initiate", skip(self), fields(upload_id = tracing::field::Empty))]
    async fn initiate_multipart_upload(&self, ext: &str) -> Result<MultipartUpload, UploadError> {
        let upload_id = next_id();
        let object_key = chunk_object_key(&upload_id, ext);

        tracing::Span::current().record("upload_id", upload_id.as_str());
        tracing::debug!(object_key = %object_key, "Initiated multipart upload");

        Ok(MultipartUpload {
            upload_id,
            object_key,
        })
    }

    #[tracing::instrument(
        name = "upload.local.upload_part",
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
        let part_path = self.part_path(upload_id, part_number)?;
        ensure_parent(&part_path).await?;

        let mut file = File::create(&part_path)
            .await
            .io_context(|| format!("failed to open part file {}", part_path.display()))?;

        let mut limited = reader.take(part_size);
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; PART_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = limited
                .read(&mut buffer)
                .await
                .io_context(|| format!("failed to read part {}", part_number))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n])
                .await
                .io_context(|| format!("failed to write part file {}", part_path.display()))?;
            written += n as u64;
        }
        file.flush()
            .await
            .io_context(|| format!("failed to write part file {}", part_path.display()))?;
        drop(file);

        if written < part_size {
            if let Err(e) = fs::remove_file(&part_path).await {
                tracing::warn!(path = %part_path.display(), error = %e, "Failed to remove short part");
            }
            metrics::record_error("short_read");
            return Err(UploadError::ShortRead {
                part_number,
                expected: part_size,
                actual: written,
            });
        }

        metrics::record_part(DRIVER, written);
        tracing::debug!(object_key = %object_key, bytes = written, "Stored part");
        Ok(hex::encode(hasher.finalize()))
    }

    #[tracing::instrument(
        name = "upload.local.complete",
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
        let final_path = self.resolve_inside(object_key)?;
        ensure_parent(&final_path).await?;

        let result = async {
            let mut final_file = File::create(&final_path)
                .await
                .io_context(|| format!("failed to create final file {}", final_path.display()))?;

            let mut merged = Vec::with_capacity(parts.len());
            for part in parts {
                check_part_number(part.part_number)?;
                let part_path = self.part_path(upload_id, part.part_number)?;
                let part_file = match File::open(&part_path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(UploadError::NotFound(format!(
                            "part {} of upload {}",
                            part.part_number, upload_id
                        )))
                    }
                    Err(e) => {
                        return Err(UploadError::Io {
                            context: format!("failed to open part file {}", part_path.display()),
                            source: e,
                        })
                    }
                };

                let mut part_reader = BufReader::with_capacity(MERGE_BUFFER_SIZE, part_file);
                tokio::io::copy_buf(&mut part_reader, &mut final_file)
                    .await
                    .io_context(|| format!("failed to merge part {}", part.part_number))?;
                merged.push(part_path);
            }

            final_file
                .flush()
                .await
                .io_context(|| format!("failed to write final file {}", final_path.display()))?;

            for part_path in merged {
                match fs::remove_file(&part_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(UploadError::Io {
                            context: format!("failed to delete part file {}", part_path.display()),
                            source: e,
                        })
                    }
                }
            }
            Ok::<(), UploadError>(())
        }
        .await;

        match result {
            Ok(()) => {
                metrics::record_multipart_success(DRIVER, parts.len());
                tracing::info!(object_key = %object_key, parts = parts.len(), "Completed multipart upload");
                Ok(object_key.to_string())
            }
            Err(e) => {
                metrics::record_multipart_failure(DRIVER);
                Err(e)
            }
        }
    }

    #[tracing::instrument(name = "upload.local.upload_file", skip(self, reader), err)]
    async fn upload_file(
        &self,
        object_key: &str,
        reader: UploadReader<'_>,
    ) -> Result<String, UploadError> {
        let path = self.resolve_inside(object_key)?;
        ensure_parent(&path).await?;

        let result = async {
            let mut file = File::create(&path)
                .await
                .io_context(|| format!("failed to create file {}", path.display()))?;
            let bytes = tokio::io::copy(reader, &mut file)
                .await
                .io_context(|| format!("failed to write file {}", path.display()))?;
            file.flush()
                .await
                .io_context(|| format!("failed to write file {}", path.display()))?;
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

    #[tracing::instrument(name = "upload.local.copy_folder", skip(self), err)]
    async fn copy_folder(&self, src: &str, dest: &str) -> Result<(), UploadError> {
        let src_path = self.resolve(src)?;
        let dest_path = self.resolve(dest)?;

        let result = run_blocking(move || copy_tree(&src_path, &dest_path)).await;
        metrics::record_storage_operation(DRIVER, "copy_folder", result.is_ok());

        let copied = result?;
        tracing::info!(files = copied, "Copied folder");
        Ok(())
    }

    #[tracing::instrument(name = "upload.local.delete_folder", skip(self), err)]
    async fn delete_folder(&self, path: &str, exclude: &[&str]) -> Result<(), UploadError> {
        let folder = self.resolve_inside(path)?;
        let excluded: Vec<PathBuf> = exclude
            .iter()
            .filter_map(|entry| normalize_under(&folder, entry))
            .filter(|entry| *entry != folder)
            .collect();

        let result = run_blocking(move || delete_tree(&folder, &excluded)).await;
        metrics::record_storage_operation(DRIVER, "delete_folder", result.is_ok());

        let removed = result?;
        tracing::info!(entries = removed, "Deleted folder");
        Ok(())
    }

    #[tracing::instrument(name = "upload.local.list_files", skip(self), err)]
    async fn list_files(
        &self,
        dir: &str,
        suffix_filters: &[&str],
    ) -> Result<Vec<String>, UploadError> {
        let root = self.root.clone();
        let dir_path = self.resolve(dir)?;
        let filters: Vec<String> = suffix_filters.iter().map(|s| s.to_string()).collect();

        let result = run_blocking(move || list_tree(&root, &dir_path, &filters)).await;
        metrics::record_storage_operation(DRIVER, "list_files", result.is_ok());
        result
    }

    #[tracing::instrument(name = "upload.local.delete_file", skip(self), err)]
    async fn delete_file(&self, object_key: &str) -> Result<(), UploadError> {
        let path = self.resolve_inside(object_key)?;

        let result = match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(UploadError::NotFound(object_key.to_string()))
            }
            Err(e) => Err(UploadError::Io {
                context: format!("failed to delete {}", path.display()),
                source: e,
            }),
        };
        metrics::record_storage_operation(DRIVER, "delete_file", result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_under() {
        let base = Path::new("/srv/storage");
        assert_eq!(
            normalize_under(base, "a/b/../c.txt"),
            Some(PathBuf::from("/srv/storage/a/c.txt"))
        );
        assert_eq!(
            normalize_under(base, "/avatar/x.png"),
            Some(PathBuf::from("/srv/storage/avatar/x.png"))
        );
        assert_eq!(normalize_under(base, "./"), Some(PathBuf::from("/srv/storage")));
        assert_eq!(normalize_under(base, "../etc/passwd"), None);
        assert_eq!(normalize_under(base, "a/../../b"), None);
    }

    #[test]
    fn test_resolve_inside_refuses_root() {
        let uploader = LocalUploader::new("/srv/storage");
        assert!(uploader.resolve("").is_ok());
        assert!(matches!(
            uploader.resolve_inside("a/.."),
            Err(UploadError::UnsafePath { .. })
        ));
    }

    #[test]
    fn test_part_path_layout() {
        let uploader = LocalUploader::new("/srv/storage");
        assert_eq!(
            uploader.part_path("1700000000", 3).unwrap(),
            PathBuf::from("/srv/storage/chunk-upload/_header/1700000000_part3")
        );
        assert!(uploader.part_path("../x", 1).is_err());
        assert!(uploader.part_path("a/b", 1).is_err());
        assert!(uploader.part_path("", 1).is_err());
    }

    #[test]
    fn test_key_of() {
        let root = Path::new("/srv/storage");
        assert_eq!(
            LocalUploader::key_of(root, Path::new("/srv/storage/a/b.txt")),
            Some("a/b.txt".to_string())
        );
        assert_eq!(LocalUploader::key_of(root, Path::new("/elsewhere")), None);
    }
}
