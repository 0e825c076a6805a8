//! Local spill file and the dual-path tee writer
//!
//! The spill file is the fallback copy of a write session. Once it exists
//! and something was written it is the source of truth for reads, seeks and
//! the final commit.

use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{error, trace};

use crate::backend::UploadStream;
use crate::error::{VfsError, VfsResult};

/// Temp file owned by one file session, removed on close
pub(crate) struct SpillFile {
    file: tokio::fs::File,
    path: TempPath,
    position: u64,
    len: u64,
}

impl SpillFile {
    /// Create an empty spill file named after `object_name`
    ///
    /// The name carries the object basename and a nanosecond timestamp;
    /// `tempfile` adds random characters on top, so two sessions on the same
    /// key never share a file.
    pub(crate) async fn create(dir: Option<&Path>, object_name: &str) -> VfsResult<Self> {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let prefix = format!(".orbit-vfs-{}-{}-", sanitize(object_name), nanos);

        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(VfsError::Io)?;

        let (file, path) = named.into_parts();
        trace!(path = %path.display(), "created spill file");
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            position: 0,
            len: 0,
        })
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        self.file.write_all(data).await.map_err(VfsError::Io)?;
        self.position += data.len() as u64;
        self.len = self.len.max(self.position);
        Ok(data.len())
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let n = self.file.read(buf).await.map_err(VfsError::Io)?;
        self.position += n as u64;
        Ok(n)
    }

    pub(crate) async fn seek(&mut self, position: u64) -> VfsResult<()> {
        self.file
            .seek(SeekFrom::Start(position))
            .await
            .map_err(VfsError::Io)?;
        self.position = position;
        Ok(())
    }

    /// Bytes written so far, counting any zero gap a write left behind
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and delete the file
    pub(crate) async fn remove(mut self) -> VfsResult<()> {
        let flushed = self.file.flush().await;
        drop(self.file);
        let shown = self.path.display().to_string();
        let removed = self.path.close();
        if let Err(e) = &removed {
            error!(path = %shown, error = %e, "failed to remove spill file");
        }
        flushed.map_err(VfsError::Io)?;
        removed.map_err(VfsError::Io)
    }
}

impl std::fmt::Debug for SpillFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillFile")
            .field("path", &self.path().display())
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Failure of one leg of a tee write
#[derive(Debug)]
pub(crate) enum TeeError {
    /// The spill file failed or the two legs diverged; the session is unusable
    Fatal(VfsError),

    /// Only the upload failed; the spill file holds every byte
    Upload { written: usize, error: VfsError },
}

/// Writes every buffer to the spill file and, when present, the direct upload
pub(crate) struct TeeWriter<'a> {
    spill: &'a mut SpillFile,
    upload: Option<&'a mut UploadStream>,
}

impl<'a> TeeWriter<'a> {
    pub(crate) fn new(spill: &'a mut SpillFile, upload: Option<&'a mut UploadStream>) -> Self {
        Self { spill, upload }
    }

    /// Write to both sinks concurrently and compare the byte counts
    pub(crate) async fn write(self, data: &[u8]) -> Result<usize, TeeError> {
        let Some(upload) = self.upload else {
            return self.spill.write(data).await.map_err(TeeError::Fatal);
        };

        let (local, remote) = tokio::join!(self.spill.write(data), upload.write(data));
        reconcile(local, remote)
    }
}

/// Combine the outcomes of the two legs of one tee write
fn reconcile(local: VfsResult<usize>, remote: VfsResult<usize>) -> Result<usize, TeeError> {
    let local = local.map_err(TeeError::Fatal)?;
    match remote {
        Ok(remote) if remote == local => Ok(local),
        Ok(remote) => Err(TeeError::Fatal(VfsError::InternalInconsistency { local, remote })),
        Err(error) => Err(TeeError::Upload {
            written: local,
            error,
        }),
    }
}
