//! Partial Record Integration Tests
//!
//! Resumable upload bookkeeping on a temporary root.

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};
    use tempfile::TempDir;
    use zero_common::upload::{PartialRecord, UploadError};

    async fn created(dir: &TempDir) -> PartialRecord {
        let mut record = PartialRecord::new(dir.path(), "upload-1", ".mp4").unwrap();
        record.create().await.unwrap();
        record
    }

    // ========================================================================
    // TEST: Chunk index
    // ========================================================================

    #[tokio::test]
    async fn test_create_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;

        assert!(record.exists().await);
        assert!(record.header_path.exists());
        assert_eq!(record.get_chunk_index().await.unwrap(), 0);
        assert_eq!(std::fs::read(&record.data_path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get_chunk_index() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;

        record.set_chunk_index(3).await.unwrap();
        assert_eq!(record.get_chunk_index().await.unwrap(), 3);
        assert_eq!(record.chunk_index, 3);
    }

    #[tokio::test]
    async fn test_large_index_then_smaller_index() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;

        record.set_chunk_index(1_234_567).await.unwrap();
        assert_eq!(record.get_chunk_index().await.unwrap(), 1_234_567);

        // Rewrite must not leave trailing digits behind
        record.set_chunk_index(9).await.unwrap();
        assert_eq!(record.get_chunk_index().await.unwrap(), 9);
        assert_eq!(std::fs::read_to_string(&record.header_path).unwrap(), "9\n");
    }

    #[tokio::test]
    async fn test_corrupt_header_is_error() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;
        std::fs::write(&record.header_path, "garbage").unwrap();

        let result = record.get_chunk_index().await;
        assert!(matches!(result, Err(UploadError::Io { .. })));
    }

    #[tokio::test]
    async fn test_unset_chunk_index_removes_header_only() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;

        record.unset_chunk_index().await.unwrap();
        assert!(!record.header_path.exists());
        assert!(record.exists().await);
        assert!(record.get_chunk_index().await.is_err());
    }

    // ========================================================================
    // TEST: Data file
    // ========================================================================

    #[tokio::test]
    async fn test_append_and_hash() {
        let dir = TempDir::new().unwrap();
        let record = created(&dir).await;

        let mut first: &[u8] = b"chunk-one;";
        let mut second: &[u8] = b"chunk-two";
        assert_eq!(record.append(&mut first).await.unwrap(), 10);
        assert_eq!(record.append(&mut second).await.unwrap(), 9);

        let expected = hex::encode(Md5::digest(b"chunk-one;chunk-two"));
        assert_eq!(record.calculate_hash().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_create_resets_existing_record() {
        let dir = TempDir::new().unwrap();
        let mut record = created(&dir).await;
        let mut chunk: &[u8] = b"stale";
        record.append(&mut chunk).await.unwrap();
        record.set_chunk_index(4).await.unwrap();

        record.create().await.unwrap();
        assert_eq!(record.get_chunk_index().await.unwrap(), 0);
        assert_eq!(std::fs::read(&record.data_path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_rename_moves_to_final_name() {
        let dir = TempDir::new().unwrap();
        let record = created(&dir).await;
        let mut chunk: &[u8] = b"done";
        record.append(&mut chunk).await.unwrap();

        let target = record.rename().await.unwrap();
        assert_eq!(target, dir.path().join("chunk-upload").join("upload-1.mp4"));
        assert_eq!(std::fs::read(&target).unwrap(), b"done");
        assert!(!record.exists().await);
    }

    #[tokio::test]
    async fn test_delete_removes_data_only() {
        let dir = TempDir::new().unwrap();
        let record = created(&dir).await;

        record.delete().await.unwrap();
        assert!(!record.exists().await);
        assert!(record.header_path.exists());

        let result = record.delete().await;
        assert!(matches!(result, Err(UploadError::Io { .. })));
    }

    #[tokio::test]
    async fn test_hash_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let record = PartialRecord::new(dir.path(), "never", ".bin").unwrap();
        assert!(record.calculate_hash().await.is_err());
    }
}
