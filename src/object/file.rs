//! Object-store file: POSIX-style read/write/seek over whole-object stores
//!
//! The store only offers whole-object PUT, range GET and streaming upload.
//! A session emulates random access on top of that:
//!
//! - Reads open a range stream at the cursor and reopen it after a seek.
//! - The first write always creates a local spill file. If the session has
//!   not read or seeked yet, a direct streaming upload is opened as well and
//!   every write is mirrored to both.
//! - A seek or read after writing cancels the direct upload; from then on
//!   the spill file is the only copy and `close` uploads it whole.
//! - A first write after a seek or read seeds the spill file with the
//!   current object so untouched bytes survive.
//! - `close` commits exactly once, removes the spill file and resets the
//!   session.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

use super::location::ObjectLocation;
use super::reader::RangeReader;
use super::spill::{SpillFile, TeeError, TeeWriter};
use super::ObjectContext;
use crate::backend::{guess_content_type, ObjectAttributes, UploadStream};
use crate::error::{VfsError, VfsResult};
use crate::path;
use crate::retry::retry;
use crate::vfs::{
    copy_contents, wait_until_exists, DeleteOptions, File, Location, DEFAULT_VISIBILITY_ATTEMPTS,
    DEFAULT_VISIBILITY_INTERVAL,
};

/// Metadata key written and removed again by touch
const TOUCH_METADATA_KEY: &str = "orbit-vfs-touch";

/// Per-session state, reset by close
#[derive(Default)]
struct Session {
    cursor: u64,
    seek_called: bool,
    read_called: bool,
    write_called: bool,
    read_eof_seen: bool,
    /// A write failed in a way that leaves nothing safe to commit
    poisoned: bool,
    reader: Option<RangeReader>,
    spill: Option<SpillFile>,
    upload: Option<UploadStream>,
}

impl Session {
    fn cancel_upload(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.cancel();
        }
    }
}

/// A single object addressed by container and key
pub struct ObjectFile {
    ctx: Arc<ObjectContext>,
    volume: String,
    path: String,
    session: Session,
}

impl ObjectFile {
    pub(crate) fn new(ctx: Arc<ObjectContext>, volume: &str, path: &str) -> Self {
        Self {
            ctx,
            volume: volume.to_string(),
            path: path.to_string(),
            session: Session::default(),
        }
    }

    fn key(&self) -> &str {
        path::remove_leading_slash(&self.path)
    }

    async fn attributes(&self) -> VfsResult<ObjectAttributes> {
        let client = self.ctx.client.as_ref();
        let (volume, key) = (self.volume.as_str(), self.key());
        retry(self.ctx.retry.as_ref(), move || client.head_object(volume, key)).await
    }

    /// Download the current object into `spill`; a missing object is empty
    async fn seed_spill(&self, spill: &mut SpillFile) -> VfsResult<()> {
        let size = match self.attributes().await {
            Ok(attrs) => attrs.size,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if size == 0 {
            return Ok(());
        }

        let client = self.ctx.client.as_ref();
        let (volume, key) = (self.volume.as_str(), self.key());
        let mut stream =
            retry(self.ctx.retry.as_ref(), move || client.range_read(volume, key, 0)).await?;
        while let Some(chunk) = stream.next().await {
            spill.write(&chunk.map_err(VfsError::Io)?).await?;
        }
        debug!(uri = %self, bytes = spill.len(), "seeded spill file from remote object");
        Ok(())
    }

    /// Create the spill file (and the direct upload when still possible)
    async fn init_writers(&mut self) -> VfsResult<()> {
        self.session.reader = None;

        let mut spill =
            SpillFile::create(self.ctx.options.temp_dir.as_deref(), self.name()).await?;

        if self.session.seek_called || self.session.read_called {
            let seeded = match self.seed_spill(&mut spill).await {
                Ok(()) => spill.seek(self.session.cursor).await,
                Err(e) => Err(e),
            };
            if let Err(e) = seeded {
                if let Err(cleanup) = spill.remove().await {
                    warn!(uri = %self, error = %cleanup, "failed to remove spill file");
                }
                return Err(e);
            }
        } else {
            let content_type = guess_content_type(self.key());
            match self
                .ctx
                .client
                .stream_write(&self.volume, self.key(), content_type.as_deref())
                .await
            {
                Ok(upload) => self.session.upload = Some(upload),
                Err(e) => {
                    // Writes still land in the spill file; close uploads it
                    warn!(uri = %self, error = %e, "direct upload unavailable, buffering locally");
                }
            }
        }

        trace!(uri = %self, direct = self.session.upload.is_some(), "initialized writers");
        self.session.spill = Some(spill);
        Ok(())
    }

    /// Upload the whole spill file as a fresh object
    async fn commit_spill(&self, spill: &mut SpillFile) -> VfsResult<()> {
        spill.seek(0).await?;
        let content_type = guess_content_type(self.key());
        let mut upload = self
            .ctx
            .client
            .stream_write(&self.volume, self.key(), content_type.as_deref())
            .await?;

        let mut buf = vec![0u8; self.ctx.options.effective_buffer_size()];
        loop {
            let n = spill.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            upload.write(&buf[..n]).await?;
        }
        debug!(uri = %self, bytes = upload.written(), "uploading spill file");
        upload.finish().await
    }

    /// Drop the session without committing anything
    async fn discard_session(&mut self) {
        let mut session = std::mem::take(&mut self.session);
        session.reader = None;
        session.cancel_upload();
        if let Some(spill) = session.spill.take() {
            if let Err(e) = spill.remove().await {
                warn!(uri = %self, error = %e, "failed to remove spill file");
            }
        }
    }

    fn epoch_nanos() -> u128 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    }

    /// Bump the modification time of an existing object
    async fn touch_existing(&self) -> VfsResult<()> {
        let client = self.ctx.client.as_ref();
        let policy = self.ctx.retry.as_ref();
        let (volume, key) = (self.volume.as_str(), self.key());

        let versioned = retry(policy, move || client.versioning_enabled(volume)).await?;
        let attrs = self.attributes().await?;

        if versioned {
            // Metadata updates do not advance the timestamp on versioned
            // buckets; move away and back instead
            let temp_key = format!("{}.touch-{}", key, Self::epoch_nanos());
            let temp = temp_key.as_str();
            let ct = attrs.content_type.as_deref();
            retry(policy, move || client.copy_object(volume, key, volume, temp, ct)).await?;
            retry(policy, move || client.remove_object(volume, key, None)).await?;
            retry(policy, move || client.copy_object(volume, temp, volume, key, ct)).await?;
            retry(policy, move || client.remove_object(volume, temp, None)).await?;
            debug!(uri = %self, "touched versioned object by copy and rename back");
            return wait_until_exists(self, DEFAULT_VISIBILITY_ATTEMPTS, DEFAULT_VISIBILITY_INTERVAL)
                .await;
        }

        let original = attrs.metadata;
        if client.metadata_update_rewrites() {
            // A rewrite advances the timestamp by itself
            let original = &original;
            retry(policy, move || client.update_metadata(volume, key, original)).await?;
            debug!(uri = %self, "touched object by rewriting it");
            return Ok(());
        }

        let mut bumped: HashMap<String, String> = original.clone();
        bumped.insert(
            TOUCH_METADATA_KEY.to_string(),
            Self::epoch_nanos().to_string(),
        );
        let (bumped, original) = (&bumped, &original);
        retry(policy, move || client.update_metadata(volume, key, bumped)).await?;
        retry(policy, move || client.update_metadata(volume, key, original)).await?;
        debug!(uri = %self, "touched object via metadata update");
        Ok(())
    }

    async fn delete_all_versions(&self) -> VfsResult<()> {
        let client = self.ctx.client.as_ref();
        let policy = self.ctx.retry.as_ref();
        let (volume, key) = (self.volume.as_str(), self.key());

        let versions: Vec<_> = retry(policy, move || client.list_versions(volume, key))
            .await?
            .into_iter()
            .filter(|v| v.key == key)
            .collect();

        if versions.is_empty() {
            return retry(policy, move || client.remove_object(volume, key, None)).await;
        }

        for version in &versions {
            let id = version.version_id.as_str();
            // Fail fast: remaining versions are left in place
            retry(policy, move || client.remove_object(volume, key, Some(id))).await?;
        }
        debug!(uri = %self, versions = versions.len(), "deleted all versions");
        Ok(())
    }
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("uri", &self.uri())
            .field("cursor", &self.session.cursor)
            .field("write_called", &self.session.write_called)
            .field("direct_upload", &self.session.upload.is_some())
            .finish()
    }
}

impl fmt::Display for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[async_trait]
impl File for ObjectFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // After a write the spill file is authoritative
        if self.session.write_called {
            self.session.cancel_upload();
            let Some(spill) = self.session.spill.as_mut() else {
                return Err(VfsError::PreconditionFailed(
                    "write session has no spill file".to_string(),
                ));
            };
            let n = spill.read(buf).await?;
            self.session.cursor += n as u64;
            self.session.read_called = true;
            return Ok(n);
        }

        self.session.read_called = true;
        if self.session.read_eof_seen {
            return Ok(0);
        }

        if self.session.reader.is_none() {
            let size = self.attributes().await?.size;
            // No range request against an empty object or past the end
            if size == 0 || self.session.cursor >= size {
                self.session.read_eof_seen = true;
                return Ok(0);
            }

            let client = self.ctx.client.as_ref();
            let (volume, key, start) = (self.volume.as_str(), self.key(), self.session.cursor);
            let stream =
                retry(self.ctx.retry.as_ref(), move || client.range_read(volume, key, start))
                    .await?;
            trace!(uri = %self, start, "opened range reader");
            self.session.reader = Some(RangeReader::new(stream));
        }

        let n = match self.session.reader.as_mut() {
            Some(reader) => reader.read(buf).await?,
            None => 0,
        };
        if n == 0 {
            self.session.read_eof_seen = true;
            self.session.reader = None;
        }
        self.session.cursor += n as u64;
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        if self.session.poisoned {
            return Err(VfsError::PreconditionFailed(format!(
                "{}: an earlier write failed; close or delete the file to reset",
                self
            )));
        }
        if self.session.spill.is_none() {
            self.init_writers().await?;
        }

        let session = &mut self.session;
        let Some(spill) = session.spill.as_mut() else {
            return Err(VfsError::PreconditionFailed(
                "write session has no spill file".to_string(),
            ));
        };

        match TeeWriter::new(spill, session.upload.as_mut()).write(data).await {
            Ok(n) => {
                session.cursor += n as u64;
                session.write_called = true;
                Ok(n)
            }
            Err(TeeError::Upload { written, error }) => {
                // Spill file has every byte; fall back to committing it on close
                warn!(uri = %self.path, error = %error, "direct upload failed, buffering locally");
                session.cancel_upload();
                session.cursor += written as u64;
                session.write_called = true;
                Ok(written)
            }
            Err(TeeError::Fatal(e)) => {
                session.poisoned = true;
                session.cancel_upload();
                Err(e)
            }
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let length = if self.session.write_called {
            self.session.spill.as_ref().map_or(0, |s| s.len())
        } else {
            match self.attributes().await {
                Ok(attrs) => attrs.size,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            }
        };

        self.session.reader = None;
        self.session.cancel_upload();

        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.session.cursor as i128 + delta as i128,
            SeekFrom::End(delta) => length as i128 + delta as i128,
        };
        if target < 0 {
            return Err(VfsError::InvalidSeek(target));
        }
        let target = target as u64;

        if let Some(spill) = self.session.spill.as_mut() {
            spill.seek(target).await?;
        }

        self.session.cursor = target;
        self.session.seek_called = true;
        self.session.read_eof_seen = !self.session.write_called && target >= length;
        trace!(uri = %self, position = target, length, "seek");
        Ok(target)
    }

    async fn close(&mut self) -> VfsResult<()> {
        let mut session = std::mem::take(&mut self.session);
        session.reader = None;

        let commit = if session.poisoned {
            session.cancel_upload();
            Err(VfsError::PreconditionFailed(format!(
                "{}: write session failed, nothing committed",
                self
            )))
        } else if let Some(upload) = session.upload.take() {
            upload.finish().await
        } else if session.write_called {
            match session.spill.as_mut() {
                Some(spill) => self.commit_spill(spill).await,
                None => Ok(()),
            }
        } else {
            Ok(())
        };

        let cleanup = match session.spill.take() {
            Some(spill) => spill.remove().await,
            None => Ok(()),
        };

        if commit.is_ok() && session.write_called {
            debug!(uri = %self, "committed write session");
        }

        match (commit, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(commit), Ok(())) => Err(commit),
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(commit), Err(cleanup)) => Err(VfsError::CloseFailed {
                commit: Box::new(commit),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    async fn exists(&self) -> VfsResult<bool> {
        match self.attributes().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self) -> VfsResult<u64> {
        Ok(self.attributes().await?.size)
    }

    async fn last_modified(&self) -> VfsResult<SystemTime> {
        Ok(self.attributes().await?.last_modified)
    }

    async fn touch(&mut self) -> VfsResult<()> {
        if !self.exists().await? {
            self.write(&[]).await?;
            return self.close().await;
        }
        self.touch_existing().await
    }

    async fn delete(&mut self, options: DeleteOptions) -> VfsResult<()> {
        self.discard_session().await;
        if options.all_versions {
            return self.delete_all_versions().await;
        }

        let client = self.ctx.client.as_ref();
        let (volume, key) = (self.volume.as_str(), self.key());
        retry(self.ctx.retry.as_ref(), move || client.remove_object(volume, key, None)).await?;
        debug!(uri = %self, "deleted object");
        Ok(())
    }

    async fn copy_to_file(&mut self, target: &mut dyn File) -> VfsResult<()> {
        if self.session.cursor != 0 {
            return Err(VfsError::PreconditionFailed(format!(
                "cannot copy {}: cursor is at {}, not 0",
                self, self.session.cursor
            )));
        }

        if self.same_backend_and_credentials(target) {
            // Pending target writes are committed first so the copy wins
            target.close().await?;
            let content_type = self.attributes().await?.content_type;

            let client = self.ctx.client.as_ref();
            let (volume, key) = (self.volume.as_str(), self.key());
            let dst_volume = target.volume().to_string();
            let dst_key = path::remove_leading_slash(target.path()).to_string();
            let (dst_volume, dst_key, ct) =
                (dst_volume.as_str(), dst_key.as_str(), content_type.as_deref());
            retry(self.ctx.retry.as_ref(), move || {
                client.copy_object(volume, key, dst_volume, dst_key, ct)
            })
            .await?;
            debug!(from = %self, to = %target.uri(), "native copy");
            return self.close().await;
        }

        let buffer_size = self.ctx.options.effective_buffer_size();
        copy_contents(self, target, buffer_size).await?;
        target.close().await?;
        self.close().await
    }

    fn location(&self) -> Box<dyn Location> {
        Box::new(ObjectLocation::new(
            self.ctx.clone(),
            &self.volume,
            &path::dirname(&self.path),
        ))
    }

    fn volume(&self) -> &str {
        &self.volume
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn scheme(&self) -> &str {
        &self.ctx.scheme
    }

    fn credential_identity(&self) -> Option<String> {
        self.ctx.identity.clone()
    }

    fn position(&self) -> u64 {
        self.session.cursor
    }
}
