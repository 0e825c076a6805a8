//! Object-store location: a key prefix inside a container

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{ObjectContext, ObjectFile};
use crate::error::VfsResult;
use crate::path;
use crate::retry::retry;
use crate::vfs::{File, Location};

/// A "directory" in an object store
///
/// The path is absolute and always ends with `/`.
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    ctx: Arc<ObjectContext>,
    volume: String,
    path: String,
}

impl ObjectLocation {
    pub(crate) fn new(ctx: Arc<ObjectContext>, volume: &str, path: &str) -> Self {
        Self {
            ctx,
            volume: volume.to_string(),
            path: path.to_string(),
        }
    }

    /// Prefix as used in object keys (no leading slash)
    fn key_prefix(&self) -> &str {
        path::remove_leading_slash(&self.path)
    }

    /// Every key directly under `search` (a key prefix), following pages
    ///
    /// Directory markers (keys ending in `/`, or equal to the directory's
    /// own prefix) are skipped.
    async fn list_keys(&self, search: &str) -> VfsResult<Vec<String>> {
        let client = self.ctx.client.as_ref();
        let policy = self.ctx.retry.as_ref();
        let volume = self.volume.as_str();
        let directory = match search.rfind('/') {
            Some(idx) => &search[..=idx],
            None => "",
        };

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let current = token.as_deref();
            let page = retry(policy, move || {
                client.list_objects(volume, search, Some("/"), current)
            })
            .await?;
            pages += 1;

            keys.extend(
                page.entries
                    .into_iter()
                    .map(|entry| entry.key)
                    .filter(|key| !key.ends_with('/') && key != directory),
            );

            match page.next_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        debug!(volume, prefix = search, pages, keys = keys.len(), "listed objects");
        Ok(keys)
    }

    fn basenames(keys: Vec<String>) -> Vec<String> {
        keys.iter().map(|k| path::basename(k).to_string()).collect()
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[async_trait]
impl Location for ObjectLocation {
    async fn list(&self) -> VfsResult<Vec<String>> {
        let keys = self.list_keys(self.key_prefix()).await?;
        Ok(Self::basenames(keys))
    }

    async fn list_by_prefix(&self, prefix: &str) -> VfsResult<Vec<String>> {
        path::validate_prefix(prefix)?;
        // Resolve dot segments but keep a trailing slash: "sub/" lists the
        // sub directory, "sub" lists names starting with "sub"
        let joined = path::clean(&format!("{}{}", self.path, prefix));
        let search = if prefix.ends_with('/') || prefix.is_empty() {
            path::ensure_trailing_slash(&joined)
        } else {
            joined
        };
        let keys = self
            .list_keys(path::remove_leading_slash(&search))
            .await?;
        Ok(Self::basenames(keys))
    }

    async fn exists(&self) -> VfsResult<bool> {
        let client = self.ctx.client.as_ref();
        let volume = self.volume.as_str();
        match retry(self.ctx.retry.as_ref(), move || client.container_exists(volume)).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn new_location(&self, relative: &str) -> VfsResult<Box<dyn Location>> {
        let path = path::join_location(&self.path, relative)?;
        Ok(Box::new(Self::new(self.ctx.clone(), &self.volume, &path)))
    }

    fn change_dir(&mut self, relative: &str) -> VfsResult<()> {
        self.path = path::join_location(&self.path, relative)?;
        Ok(())
    }

    async fn new_file(&self, relative: &str) -> VfsResult<Box<dyn File>> {
        let path = path::join_file(&self.path, relative)?;
        Ok(Box::new(ObjectFile::new(self.ctx.clone(), &self.volume, &path)))
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
}
