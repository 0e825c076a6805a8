//! Local disk backend
//!
//! The same FileSystem/Location/File triad over `tokio::fs`. Local files
//! support real random access, so no spill file is involved: reads and
//! writes go straight to an open handle. Volumes are not used; URIs look
//! like `file:///tmp/data.txt`.
//!
//! # Example
//!
//! ```no_run
//! use orbit_vfs::os::OsFileSystem;
//! use orbit_vfs::vfs::FileSystem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fs = OsFileSystem::new();
//!     let loc = fs.new_location("", "/tmp/").await?;
//!     for name in loc.list().await? {
//!         println!("{}", name);
//!     }
//!     Ok(())
//! }
//! ```

mod file;

pub use file::OsFile;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::path;
use crate::vfs::{File, FileSystem, Location};

pub(crate) const SCHEME: &str = "file";

/// [`FileSystem`] over the local disk
#[derive(Debug, Clone, Default)]
pub struct OsFileSystem {
    /// Root directory all paths are resolved under (optional constraint)
    root: Option<PathBuf>,
}

impl OsFileSystem {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve every path under `root`
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

/// Map a VFS path to a disk path
pub(crate) fn resolve(root: Option<&Path>, vfs_path: &str) -> PathBuf {
    match root {
        Some(root) => root.join(path::remove_leading_slash(vfs_path)),
        None => PathBuf::from(vfs_path),
    }
}

fn validate_volume(volume: &str) -> VfsResult<()> {
    if !volume.is_empty() {
        return Err(VfsError::validation(volume, "local paths take no volume"));
    }
    Ok(())
}

#[async_trait]
impl FileSystem for OsFileSystem {
    async fn new_file(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn File>> {
        validate_volume(volume)?;
        path::validate_absolute_file_path(abs_path)?;
        let cleaned = path::clean(abs_path);
        if cleaned.ends_with('/') {
            return Err(VfsError::validation(abs_path, "path does not name a file"));
        }
        Ok(Box::new(OsFile::new(self.root.clone(), &cleaned)))
    }

    async fn new_location(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn Location>> {
        validate_volume(volume)?;
        path::validate_absolute_location_path(abs_path)?;
        Ok(Box::new(OsLocation::new(
            self.root.clone(),
            &path::ensure_trailing_slash(&path::clean(abs_path)),
        )))
    }

    fn name(&self) -> &str {
        "Local disk"
    }

    fn scheme(&self) -> &str {
        SCHEME
    }
}

/// A directory on the local disk
#[derive(Debug, Clone)]
pub struct OsLocation {
    root: Option<PathBuf>,
    path: String,
}

impl OsLocation {
    pub(crate) fn new(root: Option<PathBuf>, path: &str) -> Self {
        Self {
            root,
            path: path.to_string(),
        }
    }

    /// Regular files directly inside `dir`, sorted; a missing directory is empty
    async fn file_names(&self, dir: &str) -> VfsResult<Vec<String>> {
        let resolved = resolve(self.root.as_deref(), dir);
        let mut entries = match fs::read_dir(&resolved).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VfsError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(VfsError::Io)? {
            if entry.file_type().await.map_err(VfsError::Io)?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        debug!(dir = %resolved.display(), files = names.len(), "listed directory");
        Ok(names)
    }
}

impl fmt::Display for OsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[async_trait]
impl Location for OsLocation {
    async fn list(&self) -> VfsResult<Vec<String>> {
        self.file_names(&self.path).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> VfsResult<Vec<String>> {
        path::validate_prefix(prefix)?;
        if prefix.is_empty() || prefix.ends_with('/') {
            let dir = path::ensure_trailing_slash(&path::clean(&format!("{}{}", self.path, prefix)));
            return self.file_names(&dir).await;
        }

        let joined = path::clean(&format!("{}{}", self.path, prefix));
        let dir = path::dirname(&joined);
        let name_prefix = path::basename(&joined);
        Ok(self
            .file_names(&dir)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(name_prefix))
            .collect())
    }

    async fn exists(&self) -> VfsResult<bool> {
        match fs::metadata(resolve(self.root.as_deref(), &self.path)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VfsError::Io(e)),
        }
    }

    fn new_location(&self, relative: &str) -> VfsResult<Box<dyn Location>> {
        let path = path::join_location(&self.path, relative)?;
        Ok(Box::new(Self::new(self.root.clone(), &path)))
    }

    fn change_dir(&mut self, relative: &str) -> VfsResult<()> {
        self.path = path::join_location(&self.path, relative)?;
        Ok(())
    }

    async fn new_file(&self, relative: &str) -> VfsResult<Box<dyn File>> {
        let path = path::join_file(&self.path, relative)?;
        Ok(Box::new(OsFile::new(self.root.clone(), &path)))
    }

    fn volume(&self) -> &str {
        ""
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn scheme(&self) -> &str {
        SCHEME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_files_only() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let fs = OsFileSystem::with_root(temp_dir.path());
        let loc = fs.new_location("", "/").await.unwrap();
        assert_eq!(loc.list().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert!(loc.exists().await.unwrap());

        let missing = loc.new_location("nope/").unwrap();
        assert!(missing.list().await.unwrap().is_empty());
        assert!(!missing.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_volume_rejected() {
        let fs = OsFileSystem::new();
        assert!(fs.new_file("host", "/tmp/a.txt").await.is_err());
    }

    #[test]
    fn test_resolve_under_root() {
        let root = Path::new("/srv/data");
        assert_eq!(resolve(Some(root), "/a/b.txt"), PathBuf::from("/srv/data/a/b.txt"));
        assert_eq!(resolve(None, "/a/b.txt"), PathBuf::from("/a/b.txt"));
    }
}
