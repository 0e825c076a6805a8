//! Local disk file

use async_trait::async_trait;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use super::{resolve, OsLocation, SCHEME};
use crate::error::{VfsError, VfsResult};
use crate::path;
use crate::vfs::{copy_contents, DeleteOptions, File, Location};

const COPY_BUFFER: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    ReadWrite,
}

/// A file on the local disk
pub struct OsFile {
    root: Option<PathBuf>,
    path: String,
    handle: Option<(fs::File, Mode)>,
    cursor: u64,
    /// Any read or seek happened this session; a first write then keeps content
    touched: bool,
}

fn not_found_or_io(path: &Path, err: std::io::Error) -> VfsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        VfsError::not_found("", path.display().to_string())
    } else {
        VfsError::Io(err)
    }
}

impl OsFile {
    pub(crate) fn new(root: Option<PathBuf>, path: &str) -> Self {
        Self {
            root,
            path: path.to_string(),
            handle: None,
            cursor: 0,
            touched: false,
        }
    }

    fn disk_path(&self) -> PathBuf {
        resolve(self.root.as_deref(), &self.path)
    }

    /// Open (or upgrade) the handle and position it at the cursor
    async fn handle(&mut self, mode: Mode) -> VfsResult<&mut fs::File> {
        let reopen = match &self.handle {
            None => true,
            Some((_, current)) => *current == Mode::Read && mode == Mode::ReadWrite,
        };

        if reopen {
            let disk_path = self.disk_path();
            let file = match mode {
                Mode::Read => fs::File::open(&disk_path)
                    .await
                    .map_err(|e| not_found_or_io(&disk_path, e))?,
                Mode::ReadWrite => {
                    if let Some(parent) = disk_path.parent() {
                        fs::create_dir_all(parent).await.map_err(VfsError::Io)?;
                    }
                    // Truncate only when the session starts with a write
                    let truncate = !self.touched && self.cursor == 0;
                    fs::OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(truncate)
                        .open(&disk_path)
                        .await
                        .map_err(VfsError::Io)?
                }
            };
            self.handle = Some((file, mode));
        }

        match self.handle.as_mut() {
            Some((file, _)) => {
                if reopen && self.cursor != 0 {
                    file.seek(SeekFrom::Start(self.cursor))
                        .await
                        .map_err(VfsError::Io)?;
                }
                Ok(file)
            }
            None => Err(VfsError::PreconditionFailed("no open handle".to_string())),
        }
    }

    async fn metadata(&self) -> VfsResult<std::fs::Metadata> {
        let disk_path = self.disk_path();
        let meta = fs::metadata(&disk_path)
            .await
            .map_err(|e| not_found_or_io(&disk_path, e))?;
        if !meta.is_file() {
            return Err(VfsError::not_found("", disk_path.display().to_string()));
        }
        Ok(meta)
    }

    async fn release(&mut self) -> VfsResult<()> {
        let result = match self.handle.take() {
            Some((mut file, Mode::ReadWrite)) => file.flush().await.map_err(VfsError::Io),
            _ => Ok(()),
        };
        self.cursor = 0;
        self.touched = false;
        result
    }
}

impl fmt::Debug for OsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsFile")
            .field("path", &self.disk_path())
            .field("cursor", &self.cursor)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl fmt::Display for OsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[async_trait]
impl File for OsFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        self.touched = true;
        let n = self.handle(Mode::Read).await?.read(buf).await.map_err(VfsError::Io)?;
        self.cursor += n as u64;
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        self.handle(Mode::ReadWrite)
            .await?
            .write_all(data)
            .await
            .map_err(VfsError::Io)?;
        self.cursor += data.len() as u64;
        self.touched = true;
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        if let Some((file, _)) = self.handle.as_mut() {
            // Length must include writes still in flight on the blocking pool
            file.flush().await.map_err(VfsError::Io)?;
        }
        let length = match &self.handle {
            Some((file, _)) => file.metadata().await.map_err(VfsError::Io)?.len(),
            None => match self.metadata().await {
                Ok(meta) => meta.len(),
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            },
        };

        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.cursor as i128 + delta as i128,
            SeekFrom::End(delta) => length as i128 + delta as i128,
        };
        if target < 0 {
            return Err(VfsError::InvalidSeek(target));
        }
        let target = target as u64;

        if let Some((file, _)) = self.handle.as_mut() {
            file.seek(SeekFrom::Start(target))
                .await
                .map_err(VfsError::Io)?;
        }
        self.cursor = target;
        self.touched = true;
        Ok(target)
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.release().await
    }

    async fn exists(&self) -> VfsResult<bool> {
        match self.metadata().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self) -> VfsResult<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn last_modified(&self) -> VfsResult<SystemTime> {
        self.metadata().await?.modified().map_err(VfsError::Io)
    }

    async fn touch(&mut self) -> VfsResult<()> {
        if !self.exists().await? {
            self.write(&[]).await?;
            return self.close().await;
        }

        // filetime is sync
        let disk_path = self.disk_path();
        tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&disk_path, filetime::FileTime::now())
        })
        .await
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))?
        .map_err(VfsError::Io)
    }

    async fn delete(&mut self, _options: DeleteOptions) -> VfsResult<()> {
        // Nothing pending to commit on disk; just drop the handle
        self.handle = None;
        self.cursor = 0;
        self.touched = false;
        let disk_path = self.disk_path();
        fs::remove_file(&disk_path)
            .await
            .map_err(|e| not_found_or_io(&disk_path, e))?;
        debug!(path = %disk_path.display(), "deleted file");
        Ok(())
    }

    async fn copy_to_file(&mut self, target: &mut dyn File) -> VfsResult<()> {
        if self.cursor != 0 {
            return Err(VfsError::PreconditionFailed(format!(
                "cannot copy {}: cursor is at {}, not 0",
                self, self.cursor
            )));
        }

        if self.same_backend_and_credentials(target) {
            self.release().await?;
            target.close().await?;
            let src = self.disk_path();
            let dst = resolve(self.root.as_deref(), target.path());
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await.map_err(VfsError::Io)?;
            }
            fs::copy(&src, &dst)
                .await
                .map_err(|e| not_found_or_io(&src, e))?;
            debug!(from = %src.display(), to = %dst.display(), "local copy");
            return Ok(());
        }

        copy_contents(self, target, COPY_BUFFER).await?;
        target.close().await?;
        self.close().await
    }

    async fn move_to_file(&mut self, target: &mut dyn File) -> VfsResult<()> {
        if !self.same_backend_and_credentials(target) {
            self.copy_to_file(target).await?;
            return self
                .delete(DeleteOptions::default())
                .await
                .map_err(|e| VfsError::MovePartial {
                    destination: target.uri(),
                    source: Box::new(e),
                    file: None,
                });
        }

        self.release().await?;
        target.close().await?;
        let src = self.disk_path();
        let dst = resolve(self.root.as_deref(), target.path());
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await.map_err(VfsError::Io)?;
        }
        fs::rename(&src, &dst)
            .await
            .map_err(|e| not_found_or_io(&src, e))?;
        debug!(from = %src.display(), to = %dst.display(), "local rename");
        Ok(())
    }

    async fn move_to_location(&mut self, location: &dyn Location) -> VfsResult<Box<dyn File>> {
        let mut target = location.new_file(self.name()).await?;
        match self.move_to_file(target.as_mut()).await {
            Ok(()) => Ok(target),
            Err(VfsError::MovePartial {
                destination,
                source,
                ..
            }) => Err(VfsError::MovePartial {
                destination,
                source,
                file: Some(target),
            }),
            Err(e) => Err(e),
        }
    }

    fn location(&self) -> Box<dyn Location> {
        Box::new(OsLocation::new(self.root.clone(), &path::dirname(&self.path)))
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

    /// Files under the same root can be copied and renamed natively
    fn credential_identity(&self) -> Option<String> {
        self.root.as_ref().map(|root| root.display().to_string())
    }

    fn position(&self) -> u64 {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_first_write_truncates() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f.txt"), b"old contents").unwrap();

        let mut file = OsFile::new(Some(temp_dir.path().to_path_buf()), "/f.txt");
        file.write(b"new").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(std::fs::read(temp_dir.path().join("f.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_write_after_seek_keeps_content() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f.txt"), b"this and that").unwrap();

        let mut file = OsFile::new(Some(temp_dir.path().to_path_buf()), "/f.txt");
        file.seek(SeekFrom::Start(0)).await.unwrap();
        file.write(b"that").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(
            std::fs::read(temp_dir.path().join("f.txt")).unwrap(),
            b"that and that"
        );
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = OsFile::new(Some(temp_dir.path().to_path_buf()), "/a/b/c.txt");
        file.write(b"x").await.unwrap();
        file.close().await.unwrap();
        assert!(temp_dir.path().join("a/b/c.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_seek_end_sees_preceding_write() {
        let temp_dir = TempDir::new().unwrap();
        let block = vec![7u8; 4096];
        for i in 0..50 {
            let path = format!("/f{}.bin", i);
            let mut file = OsFile::new(Some(temp_dir.path().to_path_buf()), &path);
            file.write(&block).await.unwrap();
            assert_eq!(file.seek(SeekFrom::End(0)).await.unwrap(), 4096);
            file.close().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = OsFile::new(Some(temp_dir.path().to_path_buf()), "/nope.txt");
        assert!(!file.exists().await.unwrap());
        assert!(file.size().await.unwrap_err().is_not_found());
        let mut buf = [0u8; 4];
        assert!(file.read(&mut buf).await.unwrap_err().is_not_found());
    }
}
