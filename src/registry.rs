//! Scheme registry and URI entry points
//!
//! Maps URI schemes to [`FileSystem`] implementations so callers can open
//! `s3://bucket/key.txt` or `file:///tmp/out/` without naming a backend.
//!
//! # Example
//!
//! ```no_run
//! use orbit_vfs::registry::FileSystemRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = FileSystemRegistry::new();
//!     let mut file = registry.new_file("file:///tmp/hello.txt").await?;
//!     file.write(b"hello").await?;
//!     file.close().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::backend::MemoryClient;
use crate::error::{VfsError, VfsResult};
use crate::object::ObjectFileSystem;
use crate::os::OsFileSystem;
use crate::vfs::{File, FileSystem, Location};

/// A URI split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub scheme: String,
    pub volume: String,
    /// Absolute path, `/` when the URI names only the volume
    pub path: String,
}

/// Split `scheme://volume/path`
pub fn parse_uri(uri: &str) -> VfsResult<ParsedUri> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| VfsError::validation(uri, "expected scheme://volume/path"))?;
    if scheme.is_empty() {
        return Err(VfsError::validation(uri, "missing scheme"));
    }

    let (volume, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    Ok(ParsedUri {
        scheme: scheme.to_ascii_lowercase(),
        volume: volume.to_string(),
        path: path.to_string(),
    })
}

/// Registry of file systems keyed by scheme
pub struct FileSystemRegistry {
    systems: RwLock<HashMap<String, Arc<dyn FileSystem>>>,
}

impl FileSystemRegistry {
    /// Registry with the built-in backends
    ///
    /// `file` and `mem` are always present; `s3` and `gs` appear when their
    /// features are enabled. Remote clients are only built on first use.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(OsFileSystem::new()));
        registry.register(Arc::new(ObjectFileSystem::memory(MemoryClient::new())));

        #[cfg(feature = "s3-native")]
        registry.register(Arc::new(ObjectFileSystem::s3()));

        #[cfg(feature = "gcs-native")]
        registry.register(Arc::new(ObjectFileSystem::gcs()));

        registry
    }

    /// Registry with nothing registered
    pub fn empty() -> Self {
        Self {
            systems: RwLock::new(HashMap::new()),
        }
    }

    /// Register a file system under its own scheme, replacing any previous one
    pub fn register(&self, fs: Arc<dyn FileSystem>) {
        let scheme = fs.scheme().to_ascii_lowercase();
        debug!(scheme = %scheme, name = fs.name(), "registered file system");
        let mut systems = self.systems.write().unwrap_or_else(|e| e.into_inner());
        systems.insert(scheme, fs);
    }

    /// Look up the file system for a scheme
    pub fn get(&self, scheme: &str) -> VfsResult<Arc<dyn FileSystem>> {
        let systems = self.systems.read().unwrap_or_else(|e| e.into_inner());
        systems
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| VfsError::UnknownScheme(scheme.to_string()))
    }

    /// Whether a scheme is registered
    pub fn supports(&self, scheme: &str) -> bool {
        let systems = self.systems.read().unwrap_or_else(|e| e.into_inner());
        systems.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let systems = self.systems.read().unwrap_or_else(|e| e.into_inner());
        let mut schemes: Vec<String> = systems.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Open a file by URI
    pub async fn new_file(&self, uri: &str) -> VfsResult<Box<dyn File>> {
        let parsed = parse_uri(uri)?;
        let fs = self.get(&parsed.scheme)?;
        fs.new_file(&parsed.volume, &parsed.path).await
    }

    /// Open a location by URI; the path must end with `/`
    pub async fn new_location(&self, uri: &str) -> VfsResult<Box<dyn Location>> {
        let parsed = parse_uri(uri)?;
        let fs = self.get(&parsed.scheme)?;
        fs.new_location(&parsed.volume, &parsed.path).await
    }
}

impl Default for FileSystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileSystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
