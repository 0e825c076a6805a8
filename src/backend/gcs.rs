//! Google Cloud Storage object client
//!
//! Built on the `object_store` crate. One store is created per bucket and
//! cached. Authentication follows the usual environment variables
//! (GOOGLE_APPLICATION_CREDENTIALS or GOOGLE_SERVICE_ACCOUNT) unless
//! `credentials_file` is set in the options.
//!
//! GCS generations are not exposed through `object_store`, so this client
//! reports versioning as disabled and refuses to list versions.

use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::{
    path::Path as ObjectPath, Attribute, AttributeValue, Attributes, GetOptions, GetRange,
    ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::types::{ListEntry, ListPage, ObjectAttributes, ObjectVersion, ReadStream};
use super::upload::{UploadChunks, UploadStream};
use super::ObjectClient;
use crate::config::Options;
use crate::error::{VfsError, VfsResult};

const BACKEND: &str = "gcs";

/// [`ObjectClient`] for Google Cloud Storage
#[derive(Debug)]
pub struct GcsObjectClient {
    credentials_file: Option<String>,
    part_size: usize,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl GcsObjectClient {
    pub async fn new(options: &Options) -> VfsResult<Self> {
        options.validate()?;
        Ok(Self {
            credentials_file: options
                .credentials_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            part_size: options.effective_part_size(),
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Use `store` for every request against `bucket`
    pub fn with_store(self, bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket.to_string(), store);
        self
    }

    fn store(&self, bucket: &str) -> VfsResult<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &self.credentials_file {
            builder = builder.with_service_account_path(path);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build().map_err(|e| {
            VfsError::Config(format!("Failed to create GCS client for {}: {}", bucket, e))
        })?);
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

fn map_err(container: &str, key: &str, operation: &str, err: object_store::Error) -> VfsError {
    match err {
        object_store::Error::NotFound { .. } => VfsError::not_found(container, key),
        other => VfsError::remote(BACKEND, format!("{} failed: {}", operation, other)),
    }
}

fn attributes(content_type: Option<&str>, metadata: Option<&HashMap<String, String>>) -> Attributes {
    let mut attrs = Attributes::new();
    if let Some(ct) = content_type {
        attrs.insert(Attribute::ContentType, AttributeValue::from(ct.to_string()));
    }
    for (k, v) in metadata.into_iter().flatten() {
        attrs.insert(
            Attribute::Metadata(k.clone().into()),
            AttributeValue::from(v.clone()),
        );
    }
    attrs
}

async fn run_upload(
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    content_type: Option<String>,
    part_size: usize,
    mut chunks: UploadChunks,
) -> VfsResult<()> {
    let attrs = attributes(content_type.as_deref(), None);
    let mut buffer: Vec<u8> = Vec::new();
    let mut multipart: Option<Box<dyn object_store::MultipartUpload>> = None;

    let err = |e: object_store::Error| VfsError::remote(BACKEND, format!("upload failed: {}", e));

    loop {
        let chunk = match chunks.next().await {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Some(mut upload) = multipart.take() {
                    let _ = upload.abort().await;
                }
                return Err(e);
            }
        };
        let Some(chunk) = chunk else { break };
        buffer.extend_from_slice(&chunk);
        if buffer.len() < part_size {
            continue;
        }

        if multipart.is_none() {
            let opts = PutMultipartOpts {
                attributes: attrs.clone(),
                ..Default::default()
            };
            multipart = Some(store.put_multipart_opts(&path, opts).await.map_err(err)?);
            debug!(path = %path, "started multipart upload");
        }
        if let Some(upload) = multipart.as_mut() {
            let part: Vec<u8> = buffer.drain(..part_size).collect();
            if let Err(e) = upload.put_part(PutPayload::from(part)).await {
                let _ = upload.abort().await;
                return Err(err(e));
            }
        }
    }

    chunks.ensure_live()?;

    match multipart {
        None => {
            let opts = PutOptions {
                attributes: attrs,
                ..Default::default()
            };
            store
                .put_opts(&path, PutPayload::from(buffer), opts)
                .await
                .map_err(err)?;
        }
        Some(mut upload) => {
            let result = async {
                if !buffer.is_empty() {
                    upload.put_part(PutPayload::from(buffer)).await?;
                }
                upload.complete().await
            }
            .await;
            if let Err(e) = result {
                let _ = upload.abort().await;
                return Err(err(e));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectClient for GcsObjectClient {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn identity(&self) -> Option<String> {
        Some(match &self.credentials_file {
            Some(path) => format!("gcs:{}", path),
            None => "gcs:env".to_string(),
        })
    }

    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", backend = "gcs", bucket = %container, key = %key)
    )]
    async fn head_object(&self, container: &str, key: &str) -> VfsResult<ObjectAttributes> {
        let store = self.store(container)?;
        let opts = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = store
            .get_opts(&ObjectPath::from(key), opts)
            .await
            .map_err(|e| map_err(container, key, "head", e))?;

        let mut attrs = ObjectAttributes::new(result.meta.size as u64, result.meta.last_modified.into());
        for (attr, value) in result.attributes.iter() {
            match attr {
                Attribute::ContentType => attrs.content_type = Some(value.as_ref().to_string()),
                Attribute::Metadata(k) => {
                    attrs.metadata.insert(k.to_string(), value.as_ref().to_string());
                }
                _ => {}
            }
        }
        Ok(attrs)
    }

    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", backend = "gcs", bucket = %container, key = %key, start)
    )]
    async fn range_read(&self, container: &str, key: &str, start: u64) -> VfsResult<ReadStream> {
        let store = self.store(container)?;
        let opts = GetOptions {
            range: Some(GetRange::Offset(start as usize)),
            ..Default::default()
        };
        let result = store
            .get_opts(&ObjectPath::from(key), opts)
            .await
            .map_err(|e| map_err(container, key, "get", e))?;

        let stream = result
            .into_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        Ok(stream.boxed())
    }

    #[tracing::instrument(
        skip(self, content_type),
        fields(otel.kind = "client", backend = "gcs", bucket = %container, key = %key)
    )]
    async fn stream_write(
        &self,
        container: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<UploadStream> {
        let store = self.store(container)?;
        let path = ObjectPath::from(key);
        let content_type = content_type.map(str::to_string);
        let part_size = self.part_size;

        Ok(UploadStream::spawn(BACKEND, move |chunks| {
            run_upload(store, path, content_type, part_size, chunks)
        }))
    }

    #[tracing::instrument(
        skip(self, content_type),
        fields(otel.kind = "client", backend = "gcs", src = %src_key, dst = %dst_key)
    )]
    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<()> {
        let src_store = self.store(src_container)?;
        let src = ObjectPath::from(src_key);
        let dst = ObjectPath::from(dst_key);

        if src_container == dst_container {
            // Server-side copy keeps the source content type, so it is
            // only usable when no other type is asked for
            let keeps_type = match content_type {
                None => true,
                Some(ct) => {
                    let current = self.head_object(src_container, src_key).await?;
                    current.content_type.as_deref() == Some(ct)
                }
            };
            if keeps_type {
                return src_store
                    .copy(&src, &dst)
                    .await
                    .map_err(|e| map_err(src_container, src_key, "copy", e));
            }
        }

        // Cross-bucket copies (or content type changes) go through the client
        let data = src_store
            .get(&src)
            .await
            .map_err(|e| map_err(src_container, src_key, "get", e))?
            .bytes()
            .await
            .map_err(|e| map_err(src_container, src_key, "get", e))?;
        let opts = PutOptions {
            attributes: attributes(content_type, None),
            ..Default::default()
        };
        self.store(dst_container)?
            .put_opts(&dst, PutPayload::from(data), opts)
            .await
            .map_err(|e| map_err(dst_container, dst_key, "put", e))?;
        Ok(())
    }

    #[tracing::instrument(
        skip(self, _version_id),
        fields(otel.kind = "client", backend = "gcs", bucket = %container, key = %key)
    )]
    async fn remove_object(
        &self,
        container: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> VfsResult<()> {
        self.store(container)?
            .delete(&ObjectPath::from(key))
            .await
            .map_err(|e| map_err(container, key, "delete", e))
    }

    /// Generations are not reachable through `object_store`
    async fn list_versions(&self, _container: &str, _prefix: &str) -> VfsResult<Vec<ObjectVersion>> {
        Err(VfsError::Unsupported {
            backend: BACKEND.to_string(),
            operation: "list_versions".to_string(),
        })
    }

    #[tracing::instrument(
        skip(self, delimiter, token),
        fields(otel.kind = "client", backend = "gcs", bucket = %container, prefix = %prefix)
    )]
    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<&str>,
    ) -> VfsResult<ListPage> {
        // Listings are collected whole, so there is never a next page
        if token.is_some() {
            return Ok(ListPage::default());
        }

        let store = self.store(container)?;

        // object_store prefixes are whole path segments; list the parent
        // directory and filter on the raw prefix here
        let dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let dir_path = (!dir.is_empty()).then(|| ObjectPath::from(dir));

        let mut page = ListPage::default();
        if delimiter.is_some() {
            let result = store
                .list_with_delimiter(dir_path.as_ref())
                .await
                .map_err(|e| map_err(container, prefix, "list", e))?;
            page.common_prefixes = result
                .common_prefixes
                .iter()
                .map(|p| format!("{}/", p))
                .filter(|p| p.starts_with(prefix))
                .collect();
            page.entries = result
                .objects
                .iter()
                .map(|m| ListEntry {
                    key: m.location.to_string(),
                    size: m.size as u64,
                })
                .filter(|e| e.key.starts_with(prefix))
                .collect();
        } else {
            let metas: Vec<_> = store
                .list(dir_path.as_ref())
                .try_collect()
                .await
                .map_err(|e| map_err(container, prefix, "list", e))?;
            page.entries = metas
                .iter()
                .map(|m| ListEntry {
                    key: m.location.to_string(),
                    size: m.size as u64,
                })
                .filter(|e| e.key.starts_with(prefix))
                .collect();
        }
        Ok(page)
    }

    async fn container_exists(&self, container: &str) -> VfsResult<bool> {
        let store = self.store(container)?;
        match store.list_with_delimiter(None).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(VfsError::remote(BACKEND, format!("list failed: {}", e))),
        }
    }

    fn metadata_update_rewrites(&self) -> bool {
        true
    }

    /// Downloads the object and uploads it again with the new metadata.
    /// The cost is a full read and write of the object.
    async fn update_metadata(
        &self,
        container: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> VfsResult<()> {
        let current = self.head_object(container, key).await?;
        let store = self.store(container)?;
        let path = ObjectPath::from(key);
        let data = store
            .get(&path)
            .await
            .map_err(|e| map_err(container, key, "get", e))?
            .bytes()
            .await
            .map_err(|e| map_err(container, key, "get", e))?;

        let opts = PutOptions {
            attributes: attributes(current.content_type.as_deref(), Some(metadata)),
            ..Default::default()
        };
        store
            .put_opts(&path, PutPayload::from(data), opts)
            .await
            .map_err(|e| map_err(container, key, "put", e))?;
        Ok(())
    }

    async fn versioning_enabled(&self, _container: &str) -> VfsResult<bool> {
        Ok(false)
    }
}
