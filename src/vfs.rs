//! Uniform FileSystem / Location / File interfaces
//!
//! Calling code writes storage-agnostic logic against these three traits and
//! picks a backend by URI scheme (see [`crate::registry`]).
//!
//! A `File` carries a session: an arbitrary interleaving of `read`, `write`
//! and `seek` calls ended by `close`. Only `close` (or `touch`/`delete`) is
//! guaranteed to finalize remote mutation. Operations on one `File` are
//! sequential; each method that touches the session takes `&mut self`.

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::io::SeekFrom;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::error::{VfsError, VfsResult};

/// Default bound for [`wait_until_exists`]
pub const DEFAULT_VISIBILITY_ATTEMPTS: u32 = 5;

/// Default poll interval for [`wait_until_exists`]
pub const DEFAULT_VISIBILITY_INTERVAL: Duration = Duration::from_secs(1);

/// Options for [`File::delete`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also remove every historical version of the object
    pub all_versions: bool,
}

impl DeleteOptions {
    pub fn all_versions() -> Self {
        Self { all_versions: true }
    }
}

/// Factory for locations and files on one backend
#[async_trait]
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// File at an absolute path inside `volume`. No remote I/O.
    async fn new_file(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn File>>;

    /// Location at an absolute path inside `volume`. No remote I/O.
    async fn new_location(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn Location>>;

    /// Human-readable backend name
    fn name(&self) -> &str;

    /// URI scheme handled by this file system
    fn scheme(&self) -> &str;
}

/// A prefix ("directory") inside a container
#[async_trait]
pub trait Location: Send + Sync + fmt::Debug + fmt::Display {
    /// Basenames of every file under this location
    async fn list(&self) -> VfsResult<Vec<String>>;

    /// Basenames of files under this location whose name starts with `prefix`
    ///
    /// A `prefix` ending in `/` names a subdirectory: `"sub/"` lists the
    /// files directly inside `sub/`, while `"sub"` matches files here
    /// whose names start with `sub` (such as `sub.txt` or `subway.csv`).
    async fn list_by_prefix(&self, prefix: &str) -> VfsResult<Vec<String>>;

    /// Basenames from [`Location::list`] matching `regex`
    async fn list_by_regex(&self, regex: &Regex) -> VfsResult<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|name| regex.is_match(name))
            .collect())
    }

    /// Whether the location's container exists
    async fn exists(&self) -> VfsResult<bool>;

    /// Child location at `relative` (must end with `/`); receiver unchanged
    fn new_location(&self, relative: &str) -> VfsResult<Box<dyn Location>>;

    /// Move this location to `relative` in place
    fn change_dir(&mut self, relative: &str) -> VfsResult<()>;

    /// File at `relative` below this location
    async fn new_file(&self, relative: &str) -> VfsResult<Box<dyn File>>;

    /// Delete the file named `relative`
    async fn delete_file(&self, relative: &str, options: DeleteOptions) -> VfsResult<()> {
        let mut file = self.new_file(relative).await?;
        file.delete(options).await
    }

    fn volume(&self) -> &str;

    /// Absolute path, always ending with `/`
    fn path(&self) -> &str;

    fn scheme(&self) -> &str;

    fn uri(&self) -> String {
        crate::path::uri(self.scheme(), self.volume(), self.path())
    }
}

/// One addressable object with a read/write/seek/close session
#[async_trait]
pub trait File: Send + Sync + fmt::Debug + fmt::Display {
    /// Read into `buf` from the cursor; `Ok(0)` means end of file
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `data` at the cursor
    async fn write(&mut self, data: &[u8]) -> VfsResult<usize>;

    /// Move the cursor; returns the new position
    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// Commit pending writes and reset the session. Safe to call twice.
    async fn close(&mut self) -> VfsResult<()>;

    /// `Ok(false)` if the object does not exist
    async fn exists(&self) -> VfsResult<bool>;

    /// Size in bytes; `NotFound` if the object does not exist
    async fn size(&self) -> VfsResult<u64>;

    /// Last modification time; `NotFound` if the object does not exist
    async fn last_modified(&self) -> VfsResult<SystemTime>;

    /// Create as empty if absent, else bump the modification time
    async fn touch(&mut self) -> VfsResult<()>;

    /// Discard the session and remove the object
    async fn delete(&mut self, options: DeleteOptions) -> VfsResult<()>;

    /// Copy this file's content to `target`, closing both
    async fn copy_to_file(&mut self, target: &mut dyn File) -> VfsResult<()>;

    /// Copy to a same-named file in `location`
    async fn copy_to_location(&mut self, location: &dyn Location) -> VfsResult<Box<dyn File>> {
        let mut target = location.new_file(self.name()).await?;
        self.copy_to_file(target.as_mut()).await?;
        Ok(target)
    }

    /// Copy to `target`, then delete this file
    ///
    /// If the copy succeeds but the delete fails the error is
    /// [`VfsError::MovePartial`], naming the destination that now exists.
    async fn move_to_file(&mut self, target: &mut dyn File) -> VfsResult<()> {
        self.copy_to_file(target).await?;
        self.delete(DeleteOptions::default())
            .await
            .map_err(|e| move_partial(target.uri(), e, None))
    }

    /// Copy to a same-named file in `location`, then delete this file
    ///
    /// On a partial move the destination file travels inside the
    /// [`VfsError::MovePartial`] error.
    async fn move_to_location(&mut self, location: &dyn Location) -> VfsResult<Box<dyn File>> {
        let target = self.copy_to_location(location).await?;
        match self.delete(DeleteOptions::default()).await {
            Ok(()) => Ok(target),
            Err(e) => Err(move_partial(target.uri(), e, Some(target))),
        }
    }

    /// Location containing this file
    fn location(&self) -> Box<dyn Location>;

    fn volume(&self) -> &str;

    /// Absolute path, never ending with `/`
    fn path(&self) -> &str;

    /// Basename
    fn name(&self) -> &str {
        crate::path::basename(self.path())
    }

    fn scheme(&self) -> &str;

    fn uri(&self) -> String {
        crate::path::uri(self.scheme(), self.volume(), self.path())
    }

    /// Identity of the credentials behind this file, if known
    fn credential_identity(&self) -> Option<String>;

    /// Whether `other` can be reached with a native copy from this file
    fn same_backend_and_credentials(&self, other: &dyn File) -> bool {
        self.scheme() == other.scheme()
            && self.credential_identity() == other.credential_identity()
    }

    /// Current cursor position
    fn position(&self) -> u64;
}

fn move_partial(destination: String, err: VfsError, file: Option<Box<dyn File>>) -> VfsError {
    warn!(destination = %destination, error = %err, "copied but failed to remove source");
    VfsError::MovePartial {
        destination,
        source: Box::new(err),
        file,
    }
}

/// Stream `source` into `target` through a `buffer_size` buffer
///
/// Neither file is closed.
pub async fn copy_contents(
    source: &mut dyn File,
    target: &mut dyn File,
    buffer_size: usize,
) -> VfsResult<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let mut offset = 0;
        while offset < n {
            let written = target.write(&buf[offset..n]).await?;
            if written == 0 {
                return Err(VfsError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("{} accepted no bytes", target.uri()),
                )));
            }
            offset += written;
        }
        total += n as u64;
    }
    debug!(from = %source.uri(), to = %target.uri(), bytes = total, "buffered copy");
    Ok(total)
}

/// Poll `file.exists()` until it reports true
///
/// For stores with eventual consistency: after a write, callers that need
/// the object observable can wait here. Fails with
/// [`VfsError::NotVisible`] once `attempts` polls have come back false.
pub async fn wait_until_exists(
    file: &dyn File,
    attempts: u32,
    interval: Duration,
) -> VfsResult<()> {
    for attempt in 1..=attempts {
        if file.exists().await? {
            return Ok(());
        }
        debug!(uri = %file.uri(), attempt, "object not visible yet");
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(VfsError::NotVisible {
        uri: file.uri(),
        attempts,
    })
}
