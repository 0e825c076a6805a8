//! Integration tests for object-store locations

use orbit_vfs::backend::MemoryClient;
use orbit_vfs::object::ObjectFileSystem;
use orbit_vfs::vfs::{DeleteOptions, FileSystem, Location};
use regex::Regex;

fn populated_store() -> MemoryClient {
    let client = MemoryClient::new().with_page_size(2);
    for key in [
        "reports/2024-01.csv",
        "reports/2024-02.csv",
        "reports/2025-01.csv",
        "reports/summary.txt",
        "reports/archive/2023-12.csv",
        "other/readme.md",
    ] {
        client.put_object("bucket", key, key.as_bytes().to_vec());
    }
    client
}

#[tokio::test]
async fn test_list_follows_pages_and_skips_subdirectories() {
    let fs = ObjectFileSystem::memory(populated_store());
    let loc = fs.new_location("bucket", "/reports/").await.unwrap();

    assert_eq!(
        loc.list().await.unwrap(),
        vec!["2024-01.csv", "2024-02.csv", "2025-01.csv", "summary.txt"]
    );
}

#[tokio::test]
async fn test_list_by_prefix() {
    let fs = ObjectFileSystem::memory(populated_store());
    let loc = fs.new_location("bucket", "/reports/").await.unwrap();

    assert_eq!(
        loc.list_by_prefix("2024").await.unwrap(),
        vec!["2024-01.csv", "2024-02.csv"]
    );
    assert_eq!(
        loc.list_by_prefix("archive/").await.unwrap(),
        vec!["2023-12.csv"]
    );
    assert!(loc.list_by_prefix("nothing").await.unwrap().is_empty());
    assert!(loc.list_by_prefix("/abs").await.is_err());
    assert!(loc.list_by_prefix("../other/").await.is_err());
}

#[tokio::test]
async fn test_prefix_with_trailing_slash_lists_subdirectory() {
    let client = MemoryClient::new();
    for key in ["d/sub.txt", "d/subway.csv", "d/sub/inner.txt", "d/other.txt"] {
        client.put_object("bucket", key, b"x".to_vec());
    }
    let fs = ObjectFileSystem::memory(client);
    let loc = fs.new_location("bucket", "/d/").await.unwrap();

    assert_eq!(
        loc.list_by_prefix("sub").await.unwrap(),
        vec!["sub.txt", "subway.csv"]
    );
    assert_eq!(loc.list_by_prefix("sub/").await.unwrap(), vec!["inner.txt"]);
}

#[tokio::test]
async fn test_list_by_regex() {
    let fs = ObjectFileSystem::memory(populated_store());
    let loc = fs.new_location("bucket", "/reports/").await.unwrap();

    let csv = Regex::new(r"^\d{4}-01\.csv$").unwrap();
    assert_eq!(
        loc.list_by_regex(&csv).await.unwrap(),
        vec!["2024-01.csv", "2025-01.csv"]
    );
}

#[tokio::test]
async fn test_exists_checks_container() {
    let fs = ObjectFileSystem::memory(populated_store());
    let loc = fs.new_location("bucket", "/anything/").await.unwrap();
    assert!(loc.exists().await.unwrap());

    let missing = fs.new_location("no-such-bucket", "/").await.unwrap();
    assert!(!missing.exists().await.unwrap());
}

#[tokio::test]
async fn test_new_file_and_delete_file() {
    let client = populated_store();
    let fs = ObjectFileSystem::memory(client.clone());
    let loc = fs.new_location("bucket", "/reports/").await.unwrap();

    let file = loc.new_file("archive/../summary.txt").await.unwrap();
    assert_eq!(file.path(), "/reports/summary.txt");
    assert!(file.exists().await.unwrap());

    loc.delete_file("summary.txt", DeleteOptions::default())
        .await
        .unwrap();
    assert!(client.object_data("bucket", "reports/summary.txt").is_none());

    assert!(loc.new_file("/abs.txt").await.is_err());
    assert!(loc.new_file("dir/").await.is_err());
}

#[tokio::test]
async fn test_uri_and_navigation() {
    let fs = ObjectFileSystem::memory(MemoryClient::new());
    let mut loc = fs.new_location("bucket", "/a/").await.unwrap();

    loc.change_dir("b/c/").unwrap();
    assert_eq!(loc.uri(), "mem://bucket/a/b/c/");
    loc.change_dir("../").unwrap();
    assert_eq!(loc.path(), "/a/b/");
    assert_eq!(loc.volume(), "bucket");
    assert_eq!(loc.scheme(), "mem");
}
