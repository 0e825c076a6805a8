//! In-memory object store
//!
//! Behaves like a small S3: containers are created on first write, objects
//! are replaced whole, and containers may carry version history. Counters
//! record how many remote calls each operation made so tests can assert on
//! remote traffic.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::types::{ListEntry, ListPage, ObjectAttributes, ObjectVersion, ReadStream};
use super::upload::UploadStream;
use super::{guess_content_type, ObjectClient};
use crate::error::{VfsError, VfsResult};

const BACKEND: &str = "mem";
const READ_CHUNK: usize = 64 * 1024;
const DEFAULT_PAGE_SIZE: usize = 1000;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
}

#[derive(Debug, Clone)]
struct Version {
    id: String,
    /// `None` is a delete marker
    object: Option<StoredObject>,
}

#[derive(Debug, Default)]
struct Container {
    versioning: bool,
    objects: BTreeMap<String, Vec<Version>>,
}

impl Container {
    fn current(&self, key: &str) -> Option<&StoredObject> {
        self.objects
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|v| v.object.as_ref())
    }
}

/// Remote calls made against a [`MemoryClient`]
#[derive(Debug, Default)]
pub struct CallCounts {
    pub head: AtomicUsize,
    pub range_read: AtomicUsize,
    pub put: AtomicUsize,
    pub copy: AtomicUsize,
    pub remove: AtomicUsize,
    pub list_versions: AtomicUsize,
    pub update_metadata: AtomicUsize,
}

#[derive(Debug, Default)]
struct Store {
    containers: RwLock<HashMap<String, Container>>,
    next_version: AtomicU64,
    /// Last handed-out modification time, in nanos since the epoch
    clock: AtomicU64,
    /// Calls that still succeed before injected failures start
    healthy: AtomicUsize,
    failures: AtomicUsize,
    calls: CallCounts,
}

impl Store {
    fn containers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Container>> {
        self.containers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn containers_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Container>> {
        self.containers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Strictly increasing timestamps, so touch always moves last_modified
    fn tick(&self) -> SystemTime {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut prev = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1_000);
            match self
                .clock
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return SystemTime::UNIX_EPOCH + Duration::from_nanos(next),
                Err(actual) => prev = actual,
            }
        }
    }

    fn version_id(&self) -> String {
        format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn injected_failure(&self) -> VfsResult<()> {
        let healthy = self.healthy.load(Ordering::SeqCst);
        if healthy > 0 {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.healthy.store(healthy - 1, Ordering::SeqCst);
            }
            return Ok(());
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(VfsError::remote(BACKEND, "connection reset by peer (injected)"));
        }
        Ok(())
    }

    fn put(&self, container: &str, key: &str, data: Bytes, content_type: Option<String>) {
        let mut attributes = ObjectAttributes::new(data.len() as u64, self.tick());
        attributes.content_type = content_type;
        let object = StoredObject { data, attributes };
        let id = self.version_id();

        let mut containers = self.containers_mut();
        let entry = containers.entry(container.to_string()).or_default();
        let versions = entry.objects.entry(key.to_string()).or_default();
        if !entry.versioning {
            versions.clear();
        }
        versions.push(Version {
            id,
            object: Some(object),
        });
    }
}

/// In-process [`ObjectClient`]
///
/// Clones share the same underlying store.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    id: u64,
    page_size: usize,
    rewrite_on_metadata_update: bool,
    store: Arc<Store>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst),
            page_size: DEFAULT_PAGE_SIZE,
            rewrite_on_metadata_update: false,
            store: Arc::new(Store::default()),
        }
    }

    /// Limit listing pages to `size` entries
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Behave like stores whose metadata updates rewrite the object
    pub fn with_rewriting_metadata(mut self) -> Self {
        self.rewrite_on_metadata_update = true;
        self
    }

    /// Create (or reconfigure) a container
    pub fn create_container(&self, name: &str, versioning: bool) {
        let mut containers = self.store.containers_mut();
        containers.entry(name.to_string()).or_default().versioning = versioning;
    }

    /// Store an object directly, bypassing the call counters
    pub fn put_object(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        self.store
            .put(container, key, data.into(), guess_content_type(key));
    }

    /// Current contents of an object, if any
    pub fn object_data(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.store
            .containers()
            .get(container)
            .and_then(|c| c.current(key))
            .map(|o| o.data.to_vec())
    }

    /// Make the next `count` remote calls fail with a transient error
    pub fn inject_failures(&self, count: usize) {
        self.inject_failures_after(0, count);
    }

    /// Let `healthy` remote calls through, then fail the next `count`
    pub fn inject_failures_after(&self, healthy: usize, count: usize) {
        self.store.healthy.store(healthy, Ordering::SeqCst);
        self.store.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &CallCounts {
        &self.store.calls
    }

    pub fn put_calls(&self) -> usize {
        self.store.calls.put.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.store.calls.remove.load(Ordering::SeqCst)
    }

    pub fn range_read_calls(&self) -> usize {
        self.store.calls.range_read.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.store.calls.copy.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.store.calls.head.load(Ordering::SeqCst)
    }

    pub fn update_metadata_calls(&self) -> usize {
        self.store.calls.update_metadata.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn identity(&self) -> Option<String> {
        Some(format!("mem-store-{}", self.id))
    }

    fn metadata_update_rewrites(&self) -> bool {
        self.rewrite_on_metadata_update
    }

    async fn head_object(&self, container: &str, key: &str) -> VfsResult<ObjectAttributes> {
        self.store.calls.head.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        self.store
            .containers()
            .get(container)
            .and_then(|c| c.current(key))
            .map(|o| o.attributes.clone())
            .ok_or_else(|| VfsError::not_found(container, key))
    }

    async fn range_read(&self, container: &str, key: &str, start: u64) -> VfsResult<ReadStream> {
        self.store.calls.range_read.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        let data = self
            .store
            .containers()
            .get(container)
            .and_then(|c| c.current(key))
            .map(|o| o.data.clone())
            .ok_or_else(|| VfsError::not_found(container, key))?;

        if start >= data.len() as u64 {
            return Err(VfsError::remote(
                BACKEND,
                format!("InvalidRange: start {} beyond object size {}", start, data.len()),
            ));
        }

        let tail = data.slice(start as usize..);
        let chunks: Vec<std::io::Result<Bytes>> = (0..tail.len())
            .step_by(READ_CHUNK)
            .map(|offset| Ok(tail.slice(offset..(offset + READ_CHUNK).min(tail.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn stream_write(
        &self,
        container: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<UploadStream> {
        self.store.injected_failure()?;
        let store = self.store.clone();
        let container = container.to_string();
        let key = key.to_string();
        let content_type = content_type.map(str::to_string);

        Ok(UploadStream::spawn(BACKEND, move |mut chunks| async move {
            let mut buf = Vec::new();
            while let Some(chunk) = chunks.next().await? {
                buf.extend_from_slice(&chunk);
            }
            chunks.ensure_live()?;
            store.calls.put.fetch_add(1, Ordering::SeqCst);
            debug!(container = %container, key = %key, bytes = buf.len(), "memory put");
            store.put(&container, &key, Bytes::from(buf), content_type);
            Ok(())
        }))
    }

    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<()> {
        self.store.calls.copy.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        let source = self
            .store
            .containers()
            .get(src_container)
            .and_then(|c| c.current(src_key))
            .cloned()
            .ok_or_else(|| VfsError::not_found(src_container, src_key))?;

        let content_type = content_type
            .map(str::to_string)
            .or(source.attributes.content_type);
        self.store.put(dst_container, dst_key, source.data, content_type);
        Ok(())
    }

    async fn remove_object(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> VfsResult<()> {
        self.store.calls.remove.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        let marker_id = self.store.version_id();

        let mut containers = self.store.containers_mut();
        let bucket = containers
            .get_mut(container)
            .ok_or_else(|| VfsError::ContainerNotFound(container.to_string()))?;

        match version_id {
            Some(id) => {
                let versions = bucket
                    .objects
                    .get_mut(key)
                    .ok_or_else(|| VfsError::not_found(container, key))?;
                let before = versions.len();
                versions.retain(|v| v.id != id);
                if versions.len() == before {
                    return Err(VfsError::not_found(container, format!("{}?versionId={}", key, id)));
                }
                if versions.is_empty() {
                    bucket.objects.remove(key);
                }
            }
            None if bucket.versioning => {
                bucket.objects.entry(key.to_string()).or_default().push(Version {
                    id: marker_id,
                    object: None,
                });
            }
            None => {
                if bucket.current(key).is_none() {
                    return Err(VfsError::not_found(container, key));
                }
                bucket.objects.remove(key);
            }
        }
        Ok(())
    }

    async fn list_versions(&self, container: &str, prefix: &str) -> VfsResult<Vec<ObjectVersion>> {
        self.store.calls.list_versions.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        let containers = self.store.containers();
        let Some(bucket) = containers.get(container) else {
            return Err(VfsError::ContainerNotFound(container.to_string()));
        };
        if !bucket.versioning {
            return Ok(Vec::new());
        }

        Ok(bucket
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| {
                versions.iter().rev().map(move |v| ObjectVersion {
                    key: key.clone(),
                    version_id: v.id.clone(),
                    is_delete_marker: v.object.is_none(),
                })
            })
            .collect())
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<&str>,
    ) -> VfsResult<ListPage> {
        self.store.injected_failure()?;
        let containers = self.store.containers();
        let Some(bucket) = containers.get(container) else {
            return Err(VfsError::ContainerNotFound(container.to_string()));
        };

        // Keys and rolled-up prefixes share one ordering; the token is the
        // last item of the previous page
        let mut items: BTreeMap<String, Option<u64>> = BTreeMap::new();
        for (key, versions) in bucket.objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let Some(object) = versions.last().and_then(|v| v.object.as_ref()) else {
                continue;
            };
            let rest = &key[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|idx| idx + d.len())) {
                Some(end) => {
                    items.insert(format!("{}{}", prefix, &rest[..end]), None);
                }
                None => {
                    items.insert(key.clone(), Some(object.attributes.size));
                }
            }
        }

        let mut page = ListPage::default();
        let mut remaining = items
            .into_iter()
            .filter(|(name, _)| token.map_or(true, |t| name.as_str() > t))
            .peekable();
        let mut last = None;
        for (name, size) in remaining.by_ref().take(self.page_size) {
            match size {
                Some(size) => page.entries.push(ListEntry {
                    key: name.clone(),
                    size,
                }),
                None => page.common_prefixes.push(name.clone()),
            }
            last = Some(name);
        }
        if remaining.peek().is_some() {
            page.is_truncated = true;
            page.next_token = last;
        }
        Ok(page)
    }

    async fn container_exists(&self, container: &str) -> VfsResult<bool> {
        self.store.injected_failure()?;
        Ok(self.store.containers().contains_key(container))
    }

    async fn update_metadata(
        &self,
        container: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> VfsResult<()> {
        self.store.calls.update_metadata.fetch_add(1, Ordering::SeqCst);
        self.store.injected_failure()?;
        let modified = self.store.tick();
        let mut containers = self.store.containers_mut();
        let object = containers
            .get_mut(container)
            .and_then(|c| c.objects.get_mut(key))
            .and_then(|versions| versions.last_mut())
            .and_then(|v| v.object.as_mut())
            .ok_or_else(|| VfsError::not_found(container, key))?;
        object.attributes.metadata = metadata.clone();
        object.attributes.last_modified = modified;
        Ok(())
    }

    async fn versioning_enabled(&self, container: &str) -> VfsResult<bool> {
        self.store.injected_failure()?;
        Ok(self
            .store
            .containers()
            .get(container)
            .is_some_and(|c| c.versioning))
    }
}
