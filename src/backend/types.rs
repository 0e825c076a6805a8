//! Common types for the remote client boundary

use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::SystemTime;

/// Object attributes returned by a HEAD-equivalent call
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttributes {
    /// Size in bytes
    pub size: u64,

    /// Last modification time
    pub last_modified: SystemTime,

    /// MIME type / content type
    pub content_type: Option<String>,

    /// Custom metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

impl ObjectAttributes {
    /// Create attributes for an object of `size` bytes
    pub fn new(size: u64, last_modified: SystemTime) -> Self {
        Self {
            size,
            last_modified,
            content_type: None,
            metadata: HashMap::new(),
        }
    }

    /// Builder pattern: set content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One object in a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Full object key
    pub key: String,

    /// Size in bytes
    pub size: u64,
}

/// One page of a (possibly truncated) listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in this page
    pub entries: Vec<ListEntry>,

    /// Key prefixes rolled up by the delimiter
    pub common_prefixes: Vec<String>,

    /// Token to pass back for the next page
    pub next_token: Option<String>,

    /// More pages remain
    pub is_truncated: bool,
}

/// One historical version of an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

/// Async read stream for object data
pub type ReadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_builder() {
        let attrs = ObjectAttributes::new(12, SystemTime::UNIX_EPOCH).with_content_type("text/plain");
        assert_eq!(attrs.size, 12);
        assert_eq!(attrs.content_type.as_deref(), Some("text/plain"));
        assert!(attrs.metadata.is_empty());
    }
}
