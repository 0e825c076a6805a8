//! Integration tests for the object-store File state machine
//!
//! Every test runs against the in-process MemoryClient with spill files in
//! a scratch directory, so no network access is needed.

use orbit_vfs::backend::{MemoryClient, ObjectClient};
use orbit_vfs::config::Options;
use orbit_vfs::error::VfsError;
use orbit_vfs::object::ObjectFileSystem;
use orbit_vfs::retry::NoRetry;
use orbit_vfs::vfs::{DeleteOptions, File, FileSystem};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    client: MemoryClient,
    fs: ObjectFileSystem,
    spill_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_client(MemoryClient::new())
    }

    fn with_client(client: MemoryClient) -> Self {
        Self::with_options(client, Options::default())
    }

    fn with_options(client: MemoryClient, options: Options) -> Self {
        let spill_dir = TempDir::new().unwrap();
        let fs = ObjectFileSystem::memory(client.clone())
            .with_options(options.with_temp_dir(spill_dir.path()));
        Self {
            client,
            fs,
            spill_dir,
        }
    }

    /// Remote failures surface on the first attempt
    fn without_retries(client: MemoryClient) -> Self {
        let mut h = Self::with_client(client);
        h.fs = h.fs.with_retry_policy(Arc::new(NoRetry));
        h
    }

    async fn open(&self, path: &str) -> Box<dyn File> {
        self.fs.new_file("bucket", path).await.unwrap()
    }

    fn spill_files(&self) -> usize {
        std::fs::read_dir(self.spill_dir.path()).unwrap().count()
    }
}

async fn read_all(file: &mut dyn File) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 7];
    loop {
        let n = file.read(&mut buf).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn sample_payloads() -> Vec<Vec<u8>> {
    vec![
        b"x".to_vec(),
        b"hello world!".to_vec(),
        (0..=255u8).collect(),
        (0..200_000u32).map(|i| (i % 251) as u8).collect(),
    ]
}

#[tokio::test]
async fn test_read_existing_object() {
    let h = Harness::new();
    h.client
        .put_object("bucket", "some/path/to/file.txt", b"hello world!".to_vec());

    let mut file = h.open("/some/path/to/file.txt").await;
    assert_eq!(read_all(file.as_mut()).await, b"hello world!");
    assert_eq!(file.size().await.unwrap(), 12);
    assert!(file.exists().await.unwrap());
    file.close().await.unwrap();
    assert_eq!(h.client.put_calls(), 0);
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let h = Harness::new();
    for (i, payload) in sample_payloads().into_iter().enumerate() {
        let path = format!("/round/trip-{}.bin", i);

        let mut writer = h.open(&path).await;
        writer.write(&payload).await.unwrap();
        writer.close().await.unwrap();

        let mut reader = h.open(&path).await;
        assert_eq!(read_all(reader.as_mut()).await, payload, "payload {}", i);
        reader.close().await.unwrap();
    }
    assert_eq!(h.spill_files(), 0);
}

#[tokio::test]
async fn test_seek_before_read_yields_suffix() {
    let h = Harness::new();
    let payload: Vec<u8> = (0..100u8).collect();
    let mut writer = h.open("/seek.bin").await;
    writer.write(&payload).await.unwrap();
    writer.close().await.unwrap();

    for offset in [0usize, 1, 50, 99, 100] {
        let mut file = h.open("/seek.bin").await;
        assert_eq!(
            file.seek(SeekFrom::Start(offset as u64)).await.unwrap(),
            offset as u64
        );
        assert_eq!(read_all(file.as_mut()).await, &payload[offset..]);
        file.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_partial_write_after_seek_preserves_rest() {
    let h = Harness::new();
    let original: Vec<u8> = b"0123456789abcdefghij".to_vec();

    for (offset, replacement) in [(0usize, &b"AB"[..]), (5, b"XYZ"), (18, b"!!")] {
        h.client.put_object("bucket", "patch.txt", original.clone());

        let mut file = h.open("/patch.txt").await;
        file.seek(SeekFrom::Start(offset as u64)).await.unwrap();
        file.write(replacement).await.unwrap();
        file.close().await.unwrap();

        let mut expected = original.clone();
        expected[offset..offset + replacement.len()].copy_from_slice(replacement);
        let mut reader = h.open("/patch.txt").await;
        assert_eq!(read_all(reader.as_mut()).await, expected);
    }
}

#[tokio::test]
async fn test_write_seek_write_overwrites_prefix() {
    let h = Harness::new();
    let mut file = h.open("/this.txt").await;

    file.write(b"this and that").await.unwrap();
    file.seek(SeekFrom::Start(0)).await.unwrap();
    file.write(b"that").await.unwrap();
    file.close().await.unwrap();

    let mut reader = h.open("/this.txt").await;
    assert_eq!(read_all(reader.as_mut()).await, b"that and that");
    assert_eq!(reader.size().await.unwrap(), 13);
    // Direct upload was abandoned on seek; only the spill file was committed
    assert_eq!(h.client.put_calls(), 1);
    assert_eq!(h.spill_files(), 0);
}

#[tokio::test]
async fn test_copy_requires_cursor_at_zero() {
    let h = Harness::new();
    h.client.put_object("bucket", "src.txt", b"source data".to_vec());
    h.client.put_object("bucket", "dst.txt", b"untouched".to_vec());

    let mut src = h.open("/src.txt").await;
    let mut dst = h.open("/dst.txt").await;
    let mut buf = [0u8; 3];
    src.read(&mut buf).await.unwrap();

    let err = src.copy_to_file(dst.as_mut()).await.unwrap_err();
    assert!(matches!(err, VfsError::PreconditionFailed(_)));
    assert_eq!(h.client.object_data("bucket", "dst.txt").unwrap(), b"untouched");
    assert_eq!(h.client.copy_calls(), 0);

    let loc = h.fs.new_location("bucket", "/other/").await.unwrap();
    assert!(src.copy_to_location(loc.as_ref()).await.is_err());
    assert!(h.client.object_data("bucket", "other/src.txt").is_none());
}

#[tokio::test]
async fn test_close_twice_writes_once() {
    let h = Harness::new();
    let mut file = h.open("/once.txt").await;

    file.write(b"payload").await.unwrap();
    file.close().await.unwrap();
    file.close().await.unwrap();

    assert_eq!(h.client.put_calls(), 1);
    assert_eq!(h.client.object_data("bucket", "once.txt").unwrap(), b"payload");
}

#[tokio::test]
async fn test_missing_object_semantics() {
    let h = Harness::new();
    let file = h.open("/never/created.txt").await;

    assert!(!file.exists().await.unwrap());
    assert!(file.size().await.unwrap_err().is_not_found());
    assert!(file.last_modified().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_touch_creates_empty_object() {
    let h = Harness::new();
    let mut file = h.open("/touched.txt").await;

    file.touch().await.unwrap();
    assert!(file.exists().await.unwrap());
    assert_eq!(file.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_touch_bumps_last_modified() {
    let h = Harness::new();
    h.client.put_object("bucket", "old.txt", b"keep me".to_vec());
    let mut file = h.open("/old.txt").await;

    let before = file.last_modified().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    file.touch().await.unwrap();
    let after = file.last_modified().await.unwrap();

    assert!(after > before);
    assert_eq!(file.size().await.unwrap(), 7);
    assert_eq!(h.client.object_data("bucket", "old.txt").unwrap(), b"keep me");
    let attrs = h.client.head_object("bucket", "old.txt").await.unwrap();
    assert!(attrs.metadata.is_empty());
}

#[tokio::test]
async fn test_touch_on_versioned_bucket() {
    let h = Harness::new();
    h.client.create_container("bucket", true);
    h.client.put_object("bucket", "v.txt", b"versioned".to_vec());
    let mut file = h.open("/v.txt").await;

    let before = file.last_modified().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    file.touch().await.unwrap();

    assert!(file.last_modified().await.unwrap() > before);
    assert_eq!(h.client.object_data("bucket", "v.txt").unwrap(), b"versioned");
    assert_eq!(h.client.copy_calls(), 2);
    let loc = h.fs.new_location("bucket", "/").await.unwrap();
    assert_eq!(loc.list().await.unwrap(), vec!["v.txt"]);
}

#[tokio::test]
async fn test_delete_all_versions() {
    let h = Harness::new();
    h.client.create_container("bucket", true);
    for body in ["one", "two", "three"] {
        h.client.put_object("bucket", "doc.txt", body.as_bytes().to_vec());
    }
    h.client.put_object("bucket", "doc.txt.bak", b"other".to_vec());
    assert_eq!(h.client.list_versions("bucket", "doc.txt").await.unwrap().len(), 4);

    let mut file = h.open("/doc.txt").await;
    file.delete(DeleteOptions::all_versions()).await.unwrap();

    assert_eq!(h.client.remove_calls(), 3);
    let left = h.client.list_versions("bucket", "doc.txt").await.unwrap();
    assert!(left.iter().all(|v| v.key == "doc.txt.bak"));
    assert!(!file.exists().await.unwrap());
}

#[tokio::test]
async fn test_plain_delete_on_versioned_bucket_leaves_history() {
    let h = Harness::new();
    h.client.create_container("bucket", true);
    h.client.put_object("bucket", "doc.txt", b"v1".to_vec());
    h.client.put_object("bucket", "doc.txt", b"v2".to_vec());

    let mut file = h.open("/doc.txt").await;
    file.delete(DeleteOptions::default()).await.unwrap();

    assert!(!file.exists().await.unwrap());
    let versions = h.client.list_versions("bucket", "doc.txt").await.unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions[0].is_delete_marker);
}

#[tokio::test]
async fn test_copy_within_store_is_native() {
    let h = Harness::new();
    h.client.put_object("bucket", "a/report.csv", b"x,y\n1,2\n".to_vec());

    let mut src = h.open("/a/report.csv").await;
    let mut dst = h.open("/b/report.csv").await;
    src.copy_to_file(dst.as_mut()).await.unwrap();

    assert_eq!(h.client.copy_calls(), 1);
    assert_eq!(h.client.range_read_calls(), 0);
    assert_eq!(h.client.object_data("bucket", "b/report.csv").unwrap(), b"x,y\n1,2\n");
    let attrs = h.client.head_object("bucket", "b/report.csv").await.unwrap();
    assert_eq!(attrs.content_type.as_deref(), Some("text/csv"));
}

#[tokio::test]
async fn test_copy_across_stores_is_buffered() {
    let source = Harness::new();
    let target = Harness::new();
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 7) as u8).collect();
    source.client.put_object("bucket", "big.bin", payload.clone());

    let mut src = source.open("/big.bin").await;
    let mut dst = target.open("/copied/big.bin").await;
    assert!(!src.same_backend_and_credentials(dst.as_ref()));
    src.copy_to_file(dst.as_mut()).await.unwrap();

    assert_eq!(source.client.copy_calls(), 0);
    assert_eq!(target.client.copy_calls(), 0);
    assert_eq!(
        target.client.object_data("bucket", "copied/big.bin").unwrap(),
        payload
    );
    assert_eq!(src.position(), 0);
}

#[tokio::test]
async fn test_move_to_location() {
    let h = Harness::new();
    h.client.put_object("bucket", "inbox/mail.txt", b"message".to_vec());

    let mut file = h.open("/inbox/mail.txt").await;
    let archive = h.fs.new_location("bucket", "/archive/").await.unwrap();
    let moved = file.move_to_location(archive.as_ref()).await.unwrap();

    assert_eq!(moved.uri(), "mem://bucket/archive/mail.txt");
    assert!(h.client.object_data("bucket", "inbox/mail.txt").is_none());
    assert_eq!(
        h.client.object_data("bucket", "archive/mail.txt").unwrap(),
        b"message"
    );
}

#[tokio::test]
async fn test_failed_upload_is_not_visible() {
    let h = Harness::new();
    h.client.put_object("bucket", "keep.txt", b"old".to_vec());

    let mut file = h.open("/keep.txt").await;
    // Direct upload cannot open, so the write is buffered; the commit on
    // close fails as well
    h.client.inject_failures(2);
    file.write(b"new contents").await.unwrap();
    assert!(file.close().await.is_err());

    assert_eq!(h.client.object_data("bucket", "keep.txt").unwrap(), b"old");
    assert_eq!(h.client.put_calls(), 0);
    assert_eq!(h.spill_files(), 0);
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_shared_credentials_on_different_stores_copy_by_buffer() {
    let options = Options::default().with_credentials_id("team");
    let source = Harness::with_options(MemoryClient::new(), options.clone());
    let target = Harness::with_options(MemoryClient::new(), options);
    source.client.put_object("bucket", "a.txt", b"payload".to_vec());

    let mut src = source.open("/a.txt").await;
    let mut dst = target.open("/b.txt").await;
    assert!(!src.same_backend_and_credentials(dst.as_ref()));
    src.copy_to_file(dst.as_mut()).await.unwrap();

    assert_eq!(target.client.object_data("bucket", "b.txt").unwrap(), b"payload");
    assert!(source.client.object_data("bucket", "b.txt").is_none());
    assert_eq!(source.client.copy_calls(), 0);
}

#[tokio::test]
async fn test_delete_all_versions_stops_at_first_failure() {
    let h = Harness::without_retries(MemoryClient::new());
    h.client.create_container("bucket", true);
    for body in ["one", "two", "three"] {
        h.client.put_object("bucket", "doc.txt", body.as_bytes().to_vec());
    }

    let mut file = h.open("/doc.txt").await;
    // list_versions and the first remove succeed, the second remove fails
    h.client.inject_failures_after(2, 1);
    assert!(file.delete(DeleteOptions::all_versions()).await.is_err());

    assert_eq!(h.client.remove_calls(), 2);
    let left = h.client.list_versions("bucket", "doc.txt").await.unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(h.client.object_data("bucket", "doc.txt").unwrap(), b"two");
}

#[tokio::test]
async fn test_move_keeps_destination_when_source_delete_fails() {
    let h = Harness::without_retries(MemoryClient::new());
    h.client.put_object("bucket", "inbox/mail.txt", b"message".to_vec());

    let mut file = h.open("/inbox/mail.txt").await;
    let archive = h.fs.new_location("bucket", "/archive/").await.unwrap();
    // head and copy succeed, removing the source fails
    h.client.inject_failures_after(2, 1);
    let err = file.move_to_location(archive.as_ref()).await.unwrap_err();

    match &err {
        VfsError::MovePartial { destination, .. } => {
            assert_eq!(destination, "mem://bucket/archive/mail.txt");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let moved = err.into_moved_file().unwrap();
    assert_eq!(moved.path(), "/archive/mail.txt");
    assert!(moved.exists().await.unwrap());
    assert_eq!(h.client.object_data("bucket", "inbox/mail.txt").unwrap(), b"message");
}

#[tokio::test]
async fn test_move_to_file_reports_partial_move() {
    let h = Harness::without_retries(MemoryClient::new());
    h.client.put_object("bucket", "a.txt", b"data".to_vec());

    let mut src = h.open("/a.txt").await;
    let mut dst = h.open("/b.txt").await;
    h.client.inject_failures_after(2, 1);
    let err = src.move_to_file(dst.as_mut()).await.unwrap_err();

    assert!(matches!(err, VfsError::MovePartial { .. }));
    assert_eq!(h.client.object_data("bucket", "b.txt").unwrap(), b"data");
    assert!(h.client.object_data("bucket", "a.txt").is_some());
}

#[tokio::test]
async fn test_touch_rewrites_once_when_metadata_update_rewrites() {
    let h = Harness::with_client(MemoryClient::new().with_rewriting_metadata());
    h.client.put_object("bucket", "stamp.txt", b"data".to_vec());

    let mut file = h.open("/stamp.txt").await;
    let before = file.last_modified().await.unwrap();
    file.touch().await.unwrap();

    assert_eq!(h.client.update_metadata_calls(), 1);
    assert!(file.last_modified().await.unwrap() > before);
    let attrs = h.client.head_object("bucket", "stamp.txt").await.unwrap();
    assert!(attrs.metadata.is_empty());
    assert_eq!(h.client.object_data("bucket", "stamp.txt").unwrap(), b"data");
}
