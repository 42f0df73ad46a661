//! Local Uploader Integration Tests
//!
//! Exercises the filesystem backend inside a temporary root.
//!
//! ## Test Coverage
//!
//! - Whole-file upload, listing and delete
//! - Multipart round trip with out-of-order part submission
//! - Short reads and missing parts
//! - Path traversal rejection
//! - Folder copy and delete with exclusions

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};
    use std::path::Path;
    use tempfile::TempDir;
    use zero_common::upload::{LocalUploader, Part, UploadError, Uploader};

    fn setup() -> (TempDir, LocalUploader) {
        let dir = TempDir::new().unwrap();
        let uploader = LocalUploader::new(dir.path());
        (dir, uploader)
    }

    async fn put(uploader: &LocalUploader, key: &str, content: &[u8]) {
        let mut reader = content;
        uploader.upload_file(key, &mut reader).await.unwrap();
    }

    fn read(root: &Path, key: &str) -> Vec<u8> {
        std::fs::read(root.join(key)).unwrap()
    }

    // ========================================================================
    // TEST: Whole-file upload
    // ========================================================================

    #[tokio::test]
    async fn test_upload_file_then_list_and_delete() {
        let (dir, uploader) = setup();

        let mut body: &[u8] = b"hello world";
        let key = uploader
            .upload_file("docs/readme.txt", &mut body)
            .await
            .unwrap();
        assert_eq!(key, "docs/readme.txt");
        assert_eq!(read(dir.path(), "docs/readme.txt"), b"hello world");

        let keys = uploader.list_files("docs", &[]).await.unwrap();
        assert_eq!(keys, vec!["docs/readme.txt"]);

        uploader.delete_file("docs/readme.txt").await.unwrap();
        let keys = uploader.list_files("docs", &[]).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_upload_file_overwrites() {
        let (dir, uploader) = setup();
        put(&uploader, "a.txt", b"a much longer first version").await;
        put(&uploader, "a.txt", b"short").await;
        assert_eq!(read(dir.path(), "a.txt"), b"short");
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let (_dir, uploader) = setup();
        let result = uploader.delete_file("nope.txt").await;
        assert!(matches!(result, Err(UploadError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_not_found() {
        let (_dir, uploader) = setup();
        let result = uploader.list_files("absent", &[]).await;
        assert!(matches!(result, Err(UploadError::NotFound(_))));
    }

    // ========================================================================
    // TEST: Listing
    // ========================================================================

    #[tokio::test]
    async fn test_list_files_suffix_filter() {
        let (_dir, uploader) = setup();
        put(&uploader, "img/a.png", b"1").await;
        put(&uploader, "img/b.PNG", b"2").await;
        put(&uploader, "img/c.jpg", b"3").await;
        put(&uploader, "img/nested/d.png", b"4").await;

        let pngs = uploader.list_files("img", &[".png"]).await.unwrap();
        assert_eq!(pngs, vec!["img/a.png", "img/b.PNG", "img/nested/d.png"]);

        let all = uploader.list_files("img", &[]).await.unwrap();
        assert_eq!(all.len(), 4);

        let none = uploader.list_files("img", &[".gif"]).await.unwrap();
        assert!(none.is_empty());
    }

    // ========================================================================
    // TEST: Multipart
    // ========================================================================

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let (dir, uploader) = setup();
        let chunks: [&[u8]; 3] = [b"first-", b"second-", b"third"];

        let upload = uploader.initiate_multipart_upload("movie.MP4").await.unwrap();
        assert!(upload.object_key.starts_with("chunk-upload/"));
        assert!(upload.object_key.ends_with(".mp4"));

        // Submit out of order
        let mut etags = vec![String::new(); 3];
        for index in [2usize, 0, 1] {
            let mut reader = chunks[index];
            let etag = uploader
                .upload_part(
                    &upload.object_key,
                    &upload.upload_id,
                    index as u32 + 1,
                    &mut reader,
                    chunks[index].len() as u64,
                )
                .await
                .unwrap();
            assert_eq!(etag, hex::encode(Md5::digest(chunks[index])));
            etags[index] = etag;
        }

        let parts: Vec<Part> = etags
            .iter()
            .enumerate()
            .map(|(i, etag)| Part::new(i as u32 + 1, etag.clone()))
            .collect();
        let key = uploader
            .complete_multipart_upload(&upload.object_key, &upload.upload_id, &parts)
            .await
            .unwrap();

        assert_eq!(key, upload.object_key);
        assert_eq!(read(dir.path(), &key), b"first-second-third");

        // Staged parts are gone
        let header_dir = dir.path().join("chunk-upload").join("_header");
        let leftovers: Vec<_> = std::fs::read_dir(&header_dir).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_multipart_merges_in_given_order() {
        let (dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".bin").await.unwrap();

        for (number, data) in [(1u32, b"AA"), (2, b"BB")] {
            let mut reader: &[u8] = data;
            uploader
                .upload_part(&upload.object_key, &upload.upload_id, number, &mut reader, 2)
                .await
                .unwrap();
        }

        let parts = vec![Part::new(2, ""), Part::new(1, "")];
        uploader
            .complete_multipart_upload(&upload.object_key, &upload.upload_id, &parts)
            .await
            .unwrap();
        assert_eq!(read(dir.path(), &upload.object_key), b"BBAA");
    }

    #[tokio::test]
    async fn test_upload_part_consumes_only_part_size() {
        let (_dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".txt").await.unwrap();

        let mut reader: &[u8] = b"0123456789";
        uploader
            .upload_part(&upload.object_key, &upload.upload_id, 1, &mut reader, 4)
            .await
            .unwrap();
        assert_eq!(reader, b"456789");
    }

    #[tokio::test]
    async fn test_short_read_fails_and_removes_part() {
        let (dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".txt").await.unwrap();

        let mut reader: &[u8] = b"abc";
        let result = uploader
            .upload_part(&upload.object_key, &upload.upload_id, 1, &mut reader, 10)
            .await;
        assert!(matches!(
            result,
            Err(UploadError::ShortRead {
                part_number: 1,
                expected: 10,
                actual: 3
            })
        ));

        let part = dir
            .path()
            .join("chunk-upload/_header")
            .join(format!("{}_part1", upload.upload_id));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_fails() {
        let (dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".txt").await.unwrap();

        let mut reader: &[u8] = b"abc";
        uploader
            .upload_part(&upload.object_key, &upload.upload_id, 1, &mut reader, 3)
            .await
            .unwrap();

        let parts = vec![Part::new(1, ""), Part::new(2, "")];
        let result = uploader
            .complete_multipart_upload(&upload.object_key, &upload.upload_id, &parts)
            .await;
        assert!(matches!(result, Err(UploadError::NotFound(_))));

        // Part 1 survives for a retry
        let part = dir
            .path()
            .join("chunk-upload/_header")
            .join(format!("{}_part1", upload.upload_id));
        assert!(part.exists());
    }

    #[tokio::test]
    async fn test_complete_without_parts_fails() {
        let (_dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".txt").await.unwrap();
        let result = uploader
            .complete_multipart_upload(&upload.object_key, &upload.upload_id, &[])
            .await;
        assert!(matches!(result, Err(UploadError::NoParts)));
    }

    #[tokio::test]
    async fn test_invalid_part_number_rejected() {
        let (_dir, uploader) = setup();
        let upload = uploader.initiate_multipart_upload(".txt").await.unwrap();

        let mut reader: &[u8] = b"x";
        let result = uploader
            .upload_part(&upload.object_key, &upload.upload_id, 0, &mut reader, 1)
            .await;
        assert!(matches!(result, Err(UploadError::InvalidPartNumber(0))));
    }

    #[tokio::test]
    async fn test_initiate_allocates_distinct_keys() {
        let (_dir, uploader) = setup();
        let a = uploader.initiate_multipart_upload(".a").await.unwrap();
        let b = uploader.initiate_multipart_upload(".a").await.unwrap();
        assert_ne!(a.upload_id, b.upload_id);
        assert_ne!(a.object_key, b.object_key);
    }

    // ========================================================================
    // TEST: Path safety
    // ========================================================================

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (dir, uploader) = setup();
        let outside = dir.path().parent().unwrap().join("outside-victim.txt");

        let result = uploader.delete_file("../outside-victim.txt").await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));

        let result = uploader.delete_folder("a/../../x", &[]).await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));

        let mut body: &[u8] = b"x";
        let result = uploader.upload_file("../../etc/evil", &mut body).await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));

        let result = uploader.copy_folder("..", "copy").await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));

        assert!(!outside.exists());
    }

    #[tokio::test]
    async fn test_root_itself_cannot_be_deleted() {
        let (dir, uploader) = setup();
        put(&uploader, "keep.txt", b"x").await;

        let result = uploader.delete_folder("", &[]).await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));
        let result = uploader.delete_folder("sub/..", &[]).await;
        assert!(matches!(result, Err(UploadError::UnsafePath { .. })));

        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_inner_dot_dot_stays_inside() {
        let (dir, uploader) = setup();
        put(&uploader, "a/b/../c.txt", b"x").await;
        assert!(dir.path().join("a/c.txt").exists());
    }

    // ========================================================================
    // TEST: Folder operations
    // ========================================================================

    #[tokio::test]
    async fn test_copy_folder_mirrors_keys() {
        let (dir, uploader) = setup();
        put(&uploader, "a/1.txt", b"one").await;
        put(&uploader, "a/sub/2.txt", b"two").await;

        uploader.copy_folder("a", "b").await.unwrap();

        let copied = uploader.list_files("b", &[]).await.unwrap();
        assert_eq!(copied, vec!["b/1.txt", "b/sub/2.txt"]);
        assert_eq!(read(dir.path(), "b/sub/2.txt"), b"two");

        let original = uploader.list_files("a", &[]).await.unwrap();
        assert_eq!(original, vec!["a/1.txt", "a/sub/2.txt"]);
    }

    #[tokio::test]
    async fn test_copy_folder_onto_itself_keeps_content() {
        let (dir, uploader) = setup();
        put(&uploader, "a/f.txt", b"precious").await;
        put(&uploader, "a/sub/g.txt", b"nested").await;

        for dest in ["a", "a/", "b/../a"] {
            uploader.copy_folder("a", dest).await.unwrap();
            assert_eq!(read(dir.path(), "a/f.txt"), b"precious");
            assert_eq!(read(dir.path(), "a/sub/g.txt"), b"nested");
        }
        assert!(!dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_copy_single_file_source() {
        let (dir, uploader) = setup();
        put(&uploader, "a/f.txt", b"single").await;

        uploader.copy_folder("a/f.txt", "b/f.txt").await.unwrap();

        assert_eq!(read(dir.path(), "b/f.txt"), b"single");
        assert_eq!(read(dir.path(), "a/f.txt"), b"single");
    }

    #[tokio::test]
    async fn test_copy_missing_folder_fails() {
        let (_dir, uploader) = setup();
        let result = uploader.copy_folder("nothing", "b").await;
        assert!(matches!(result, Err(UploadError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_folder_with_exclude() {
        let (dir, uploader) = setup();
        put(&uploader, "a/x.txt", b"1").await;
        put(&uploader, "a/sub/y.txt", b"2").await;
        put(&uploader, "a/keep/z.txt", b"3").await;
        put(&uploader, "a/keep/deep/w.txt", b"4").await;
        put(&uploader, "a/keep.txt", b"5").await;

        uploader.delete_folder("a", &["keep"]).await.unwrap();

        let left = uploader.list_files("a", &[]).await.unwrap();
        assert_eq!(left, vec!["a/keep/deep/w.txt", "a/keep/z.txt"]);
        assert!(!dir.path().join("a/sub").exists());
        assert!(dir.path().join("a").is_dir());
    }

    #[tokio::test]
    async fn test_delete_folder_removes_everything() {
        let (dir, uploader) = setup();
        put(&uploader, "gone/x.txt", b"1").await;
        put(&uploader, "gone/y/z.txt", b"2").await;

        uploader.delete_folder("gone", &[]).await.unwrap();
        assert!(!dir.path().join("gone").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_folder_is_ok() {
        let (_dir, uploader) = setup();
        uploader.delete_folder("never-existed", &[]).await.unwrap();
    }
}
