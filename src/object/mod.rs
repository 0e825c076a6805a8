//! Object-store file system
//!
//! Presents any [`ObjectClient`] (S3, GCS, in-memory) through the uniform
//! [`FileSystem`]/[`Location`]/[`File`] triad. The client is built lazily on
//! first use from the file system's [`Options`]; replacing the options drops
//! the cached client.
//!
//! # Example
//!
//! ```no_run
//! use orbit_vfs::backend::MemoryClient;
//! use orbit_vfs::object::ObjectFileSystem;
//! use orbit_vfs::vfs::FileSystem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fs = ObjectFileSystem::memory(MemoryClient::new());
//!     let mut file = fs.new_file("bucket", "/some/path/to/file.txt").await?;
//!     file.write(b"hello world!").await?;
//!     file.close().await?;
//!     Ok(())
//! }
//! ```

mod file;
mod location;
mod reader;
mod spill;

pub use file::ObjectFile;
pub use location::ObjectLocation;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{MemoryClient, ObjectClient};
use crate::config::Options;
use crate::error::{VfsError, VfsResult};
use crate::path;
use crate::retry::RetryPolicy;
use crate::vfs::{File, FileSystem, Location};

/// Pending client construction
pub type ClientFuture = BoxFuture<'static, VfsResult<Arc<dyn ObjectClient>>>;

/// Builds a client from options
pub type ClientFactory = Arc<dyn Fn(Options) -> ClientFuture + Send + Sync>;

/// Everything a file or location needs to reach its store
pub(crate) struct ObjectContext {
    pub(crate) scheme: String,
    pub(crate) client: Arc<dyn ObjectClient>,
    pub(crate) options: Options,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    pub(crate) identity: Option<String>,
}

impl fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectContext")
            .field("scheme", &self.scheme)
            .field("backend", &self.client.backend_name())
            .field("identity", &self.identity)
            .finish()
    }
}

struct FsState {
    options: Options,
    context: Option<Arc<ObjectContext>>,
}

/// [`FileSystem`] over an object store
pub struct ObjectFileSystem {
    scheme: String,
    name: String,
    factory: ClientFactory,
    retry_override: Option<Arc<dyn RetryPolicy>>,
    state: Mutex<FsState>,
}

impl ObjectFileSystem {
    /// File system for `scheme` whose client is built by `factory`
    pub fn new(scheme: impl Into<String>, name: impl Into<String>, factory: ClientFactory) -> Self {
        Self {
            scheme: scheme.into(),
            name: name.into(),
            factory,
            retry_override: None,
            state: Mutex::new(FsState {
                options: Options::default(),
                context: None,
            }),
        }
    }

    /// File system for `scheme` that always uses `client`
    pub fn with_client(scheme: impl Into<String>, client: Arc<dyn ObjectClient>) -> Self {
        let scheme = scheme.into();
        let name = format!("{} object store", client.backend_name());
        let factory: ClientFactory = Arc::new(move |_options| -> ClientFuture {
            let client = client.clone();
            Box::pin(async move { Ok(client) })
        });
        Self::new(scheme, name, factory)
    }

    /// In-memory file system, scheme `mem`
    pub fn memory(client: MemoryClient) -> Self {
        let mut fs = Self::with_client("mem", Arc::new(client));
        fs.name = "In-memory object store".to_string();
        fs
    }

    /// Amazon S3, scheme `s3`
    #[cfg(feature = "s3-native")]
    pub fn s3() -> Self {
        use crate::backend::S3ObjectClient;
        let factory: ClientFactory = Arc::new(|options| -> ClientFuture {
            Box::pin(async move {
                let client = S3ObjectClient::new(&options).await?;
                Ok(Arc::new(client) as Arc<dyn ObjectClient>)
            })
        });
        Self::new("s3", "AWS S3", factory)
    }

    /// Google Cloud Storage, scheme `gs`
    #[cfg(feature = "gcs-native")]
    pub fn gcs() -> Self {
        use crate::backend::GcsObjectClient;
        let factory: ClientFactory = Arc::new(|options| -> ClientFuture {
            Box::pin(async move {
                let client = GcsObjectClient::new(&options).await?;
                Ok(Arc::new(client) as Arc<dyn ObjectClient>)
            })
        });
        Self::new("gs", "Google Cloud Storage", factory)
    }

    /// Builder pattern: set initial options
    pub fn with_options(mut self, options: Options) -> Self {
        let state = self.state.get_mut();
        state.options = options;
        state.context = None;
        self
    }

    /// Builder pattern: use `policy` instead of the one in the options
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_override = Some(policy);
        self
    }

    /// Replace the options; the client is rebuilt on next use
    pub async fn set_options(&self, options: Options) -> VfsResult<()> {
        options.validate()?;
        let mut state = self.state.lock().await;
        state.options = options;
        if state.context.take().is_some() {
            debug!(scheme = %self.scheme, "options changed, dropped cached client");
        }
        Ok(())
    }

    pub async fn options(&self) -> Options {
        self.state.lock().await.options.clone()
    }

    /// Cached context, building the client if needed
    pub(crate) async fn context(&self) -> VfsResult<Arc<ObjectContext>> {
        let mut state = self.state.lock().await;
        if let Some(ctx) = &state.context {
            return Ok(ctx.clone());
        }

        let options = state.options.clone();
        let client = (self.factory)(options.clone()).await?;
        let identity = match (client.identity(), options.credential_identity()) {
            (Some(store), Some(credential)) => Some(format!("{}|{}", store, credential)),
            (store, credential) => store.or(credential),
        };
        let retry = self
            .retry_override
            .clone()
            .unwrap_or_else(|| options.retry.policy());
        debug!(scheme = %self.scheme, backend = client.backend_name(), "built object client");

        let ctx = Arc::new(ObjectContext {
            scheme: self.scheme.clone(),
            client,
            options,
            retry,
            identity,
        });
        state.context = Some(ctx.clone());
        Ok(ctx)
    }
}

impl fmt::Debug for ObjectFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFileSystem")
            .field("scheme", &self.scheme)
            .field("name", &self.name)
            .finish()
    }
}

fn validate_volume(volume: &str) -> VfsResult<()> {
    if volume.is_empty() || volume.contains('/') {
        return Err(VfsError::validation(
            volume,
            "container name must be non-empty and contain no slash",
        ));
    }
    Ok(())
}

#[async_trait]
impl FileSystem for ObjectFileSystem {
    async fn new_file(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn File>> {
        validate_volume(volume)?;
        path::validate_absolute_file_path(abs_path)?;
        let cleaned = path::clean(abs_path);
        if cleaned.ends_with('/') {
            return Err(VfsError::validation(abs_path, "path does not name a file"));
        }
        let ctx = self.context().await?;
        Ok(Box::new(ObjectFile::new(ctx, volume, &cleaned)))
    }

    async fn new_location(&self, volume: &str, abs_path: &str) -> VfsResult<Box<dyn Location>> {
        validate_volume(volume)?;
        path::validate_absolute_location_path(abs_path)?;
        let ctx = self.context().await?;
        Ok(Box::new(ObjectLocation::new(
            ctx,
            volume,
            &path::ensure_trailing_slash(&path::clean(abs_path)),
        )))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_client_built_lazily_and_cached() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let client = MemoryClient::new();
        let factory: ClientFactory = Arc::new(move |_options| -> ClientFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            let client = client.clone();
            Box::pin(async move { Ok(Arc::new(client) as Arc<dyn ObjectClient>) })
        });
        let fs = ObjectFileSystem::new("mem", "test", factory);
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        fs.new_file("bucket", "/a.txt").await.unwrap();
        fs.new_location("bucket", "/dir/").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        fs.set_options(Options::default().with_buffer_size(1024))
            .await
            .unwrap();
        fs.new_file("bucket", "/a.txt").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(fs.options().await.buffer_size, 1024);
    }

    #[tokio::test]
    async fn test_path_validation_before_client() {
        let fs = ObjectFileSystem::memory(MemoryClient::new());
        assert!(matches!(
            fs.new_file("bucket", "relative.txt").await,
            Err(VfsError::Validation { .. })
        ));
        assert!(matches!(
            fs.new_file("bucket", "/dir/").await,
            Err(VfsError::Validation { .. })
        ));
        assert!(matches!(
            fs.new_location("bucket", "/dir").await,
            Err(VfsError::Validation { .. })
        ));
        assert!(fs.new_file("", "/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_identity_combines_store_and_credentials() {
        let client = MemoryClient::new();
        let store = client.identity().unwrap();
        let fs = ObjectFileSystem::memory(client)
            .with_options(Options::default().with_credentials_id("team-a"));
        let file = fs.new_file("bucket", "/a.txt").await.unwrap();
        assert_eq!(
            file.credential_identity(),
            Some(format!("{}|team-a", store))
        );

        let fs = ObjectFileSystem::memory(MemoryClient::new());
        let file = fs.new_file("bucket", "/a.txt").await.unwrap();
        assert!(file.credential_identity().unwrap().starts_with("mem-store-"));
    }

    #[tokio::test]
    async fn test_same_credentials_on_different_stores_not_native() {
        let options = Options::default().with_credentials_id("team");
        let a = ObjectFileSystem::memory(MemoryClient::new()).with_options(options.clone());
        let b = ObjectFileSystem::memory(MemoryClient::new()).with_options(options);

        let src = a.new_file("bucket", "/a.txt").await.unwrap();
        let dst = b.new_file("bucket", "/a.txt").await.unwrap();
        assert!(!src.same_backend_and_credentials(dst.as_ref()));

        let again = a.new_file("bucket", "/b.txt").await.unwrap();
        assert!(src.same_backend_and_credentials(again.as_ref()));
    }

    #[test]
    fn test_scheme_and_name() {
        let fs = ObjectFileSystem::memory(MemoryClient::new());
        assert_eq!(fs.scheme(), "mem");
        assert_eq!(fs.name(), "In-memory object store");
    }
}
