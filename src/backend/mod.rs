//! Raw remote client boundary for object stores
//!
//! The object-store file system ([`crate::object`]) talks to storage only
//! through the [`ObjectClient`] trait. Each implementation is a thin wrapper
//! over a native client:
//!
//! - [`MemoryClient`]: in-process store, always available
//! - `S3ObjectClient`: AWS S3 and S3-compatible stores (feature `s3-native`)
//! - `GcsObjectClient`: Google Cloud Storage (feature `gcs-native`)
//!
//! Implementations report a missing object as [`VfsError::NotFound`] and
//! every other failure as [`VfsError::Remote`]; retry and higher-level
//! translation happen in the caller.
//!
//! # Example
//!
//! ```no_run
//! use orbit_vfs::backend::{MemoryClient, ObjectClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MemoryClient::new();
//!     client.put_object("bucket", "some/file.txt", b"hello world!".to_vec());
//!
//!     let attrs = client.head_object("bucket", "some/file.txt").await?;
//!     println!("Size: {} bytes", attrs.size);
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod types;
pub mod upload;

#[cfg(feature = "s3-native")]
mod s3;

#[cfg(feature = "gcs-native")]
mod gcs;

pub use memory::MemoryClient;
pub use types::{ListEntry, ListPage, ObjectAttributes, ObjectVersion, ReadStream};
pub use upload::{UploadChunks, UploadStream};

#[cfg(feature = "s3-native")]
pub use s3::S3ObjectClient;

#[cfg(feature = "gcs-native")]
pub use gcs::GcsObjectClient;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::VfsResult;

/// Operations the object-store file system needs from a storage backend
///
/// Keys never start with `/`. Containers are buckets.
#[async_trait]
pub trait ObjectClient: Send + Sync + std::fmt::Debug {
    /// Backend identifier used in errors and logs (e.g. "s3", "gcs", "mem")
    fn backend_name(&self) -> &str;

    /// Identity of the store this client reaches (endpoint, region or
    /// account). Combined with the configured credentials to decide
    /// whether a server-side copy can reach another file.
    fn identity(&self) -> Option<String> {
        None
    }

    /// Whether `update_metadata` rewrites the whole object, which also
    /// advances its modification time
    fn metadata_update_rewrites(&self) -> bool {
        false
    }

    /// Object attributes; `NotFound` if the object does not exist
    async fn head_object(&self, container: &str, key: &str) -> VfsResult<ObjectAttributes>;

    /// Stream the object from `start` to its end
    async fn range_read(&self, container: &str, key: &str, start: u64) -> VfsResult<ReadStream>;

    /// Begin a streaming upload that replaces the object once finished
    async fn stream_write(
        &self,
        container: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<UploadStream>;

    /// Server-side copy
    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<()>;

    /// Remove an object, or one specific version of it
    async fn remove_object(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> VfsResult<()>;

    /// Every stored version of objects whose key starts with `prefix`
    async fn list_versions(&self, container: &str, prefix: &str) -> VfsResult<Vec<ObjectVersion>>;

    /// One page of objects under `prefix`
    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<&str>,
    ) -> VfsResult<ListPage>;

    /// Whether the container exists
    async fn container_exists(&self, container: &str) -> VfsResult<bool>;

    /// Replace the object's custom metadata
    async fn update_metadata(
        &self,
        container: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> VfsResult<()>;

    /// Whether object versioning is enabled on the container
    async fn versioning_enabled(&self, container: &str) -> VfsResult<bool>;
}

/// Guess a content type from an object key's extension
pub fn guess_content_type(key: &str) -> Option<String> {
    mime_guess::from_path(key).first().map(|m| m.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("a/b.txt").as_deref(), Some("text/plain"));
        assert_eq!(guess_content_type("data.json").as_deref(), Some("application/json"));
        assert_eq!(guess_content_type("noext"), None);
    }
}
